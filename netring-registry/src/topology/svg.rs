//! Self-contained SVG rendering of the topology
//!
//! A pure function from topology state to a text document. The output
//! embeds its own styling and a small script for zoom buttons, click-drag
//! panning, and hover tooltips, so it works opened directly or inside the
//! dashboard iframe.

use std::fmt::Write as _;

use super::graph::{InteractiveTopology, NodeType};

/// Render the interactive topology as an SVG document of the given pixel
/// dimensions.
#[must_use]
pub fn render(data: &InteractiveTopology, width: u32, height: u32) -> String {
    if data.nodes.is_empty() {
        return empty_document();
    }

    let width = f64::from(width);
    let height = f64::from(height);
    let center_x = width / 2.0;
    let center_y = height / 2.0;
    let scale = width.min(height) * 0.15;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg width="{width}" height="{height}" viewBox="0 0 {width} {height}" xmlns="http://www.w3.org/2000/svg">
"##
    );
    svg.push_str(STYLE_BLOCK);
    svg.push_str(BACKGROUND_BLOCK);

    let _ = write!(
        svg,
        r##"<text x="{center_x}" y="30" text-anchor="middle" fill="#f0f6fc" font-family="system-ui" font-size="20" font-weight="600">Network Topology Analysis</text>
"##
    );

    let mut content = String::new();
    content.push_str("<g id=\"edges\">\n");
    for edge in &data.edges {
        let Some(source) = data.nodes.iter().find(|node| node.id == edge.source) else {
            continue;
        };
        let Some(target) = data.nodes.iter().find(|node| node.id == edge.target) else {
            continue;
        };
        let x1 = center_x + source.x * scale;
        let y1 = center_y + source.y * scale;
        let x2 = center_x + target.x * scale;
        let y2 = center_y + target.y * scale;

        let css_class = edge_class(edge.latency);
        let arrow_color = arrow_color(edge.latency);
        let arrow_x = x1 + 0.75 * (x2 - x1);
        let arrow_y = y1 + 0.75 * (y2 - y1);
        let angle = (y2 - y1).atan2(x2 - x1).to_degrees();
        let mid_x = (x1 + x2) / 2.0;
        let mid_y = (y1 + y2) / 2.0;
        let latency_text = if edge.latency > 0.0 {
            format!("{:.1}ms", edge.latency)
        } else {
            "&lt;1ms".to_string()
        };

        let _ = write!(
            content,
            r##"<g class="edge-group">
<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" class="{css_class}" data-latency="{latency:.2}" onmouseover="showTooltip(evt, 'Latency: {latency:.2}ms')" onmouseout="hideTooltip()"></line>
<g transform="translate({arrow_x:.1},{arrow_y:.1}) rotate({angle:.1})"><polygon points="-8,-4 8,0 -8,4" fill="{arrow_color}" opacity="0.8" class="direction-arrow"></polygon></g>
<text x="{mid_x:.1}" y="{mid_y:.1}" class="latency-label" text-anchor="middle" dominant-baseline="central" fill="#f0f6fc" font-size="10">{latency_text}</text>
</g>
"##,
            latency = edge.latency,
        );
    }
    content.push_str("</g>\n<g id=\"nodes\">\n");

    for node in &data.nodes {
        let x = center_x + node.x * scale;
        let y = center_y + node.y * scale;
        let (radius, css_class, label_class) = match node.node_type {
            NodeType::Location => (28, "location-node", "node-label"),
            NodeType::Router => (16, "router-node", "router-label"),
        };
        let tooltip = match node.node_type {
            NodeType::Location => format!("Location: {}", node.label),
            NodeType::Router => format!("Router: {}", node.label),
        };
        let label = truncate_label(&node.label, node.node_type);

        let _ = write!(
            content,
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="{radius}" class="{css_class}" onmouseover="showTooltip(evt, '{tooltip}')" onmouseout="hideTooltip()"></circle>
<text x="{x:.1}" y="{y:.1}" class="{label_class}">{label}</text>
"##
        );
    }
    content.push_str("</g>\n");

    let controls_x = width - 120.0;
    let button_x = width - 70.0;
    let _ = write!(
        svg,
        r##"<g id="zoom-controls" style="pointer-events: all;">
<rect x="{controls_x}" y="20" width="100" height="80" rx="8" ry="8" fill="#21262d" stroke="#30363d" stroke-width="1" opacity="0.9"/>
<circle cx="{button_x}" cy="45" r="15" fill="#238636" stroke="#2ea043" stroke-width="1" cursor="pointer" onclick="zoomIn()"><title>Zoom In</title></circle>
<text x="{button_x}" y="50" text-anchor="middle" fill="white" font-size="16" font-weight="bold" pointer-events="none">+</text>
<circle cx="{button_x}" cy="75" r="15" fill="#da3633" stroke="#f85149" stroke-width="1" cursor="pointer" onclick="zoomOut()"><title>Zoom Out</title></circle>
<text x="{button_x}" y="81" text-anchor="middle" fill="white" font-size="18" font-weight="bold" pointer-events="none">&#8722;</text>
</g>
<g id="topology-content" transform="translate(0,0) scale(1)">
{content}</g>
<g id="tooltip" style="pointer-events: none;">
<rect id="tooltip-bg" class="tooltip-bg" x="0" y="0" width="120" height="40"/>
<text id="tooltip-text" class="tooltip-text" x="10" y="25">Tooltip</text>
</g>
"##
    );
    svg.push_str(SCRIPT_BLOCK);
    svg.push_str("</svg>");
    svg
}

fn edge_class(latency: f64) -> &'static str {
    if latency > 50.0 {
        "edge-bad"
    } else if latency > 20.0 {
        "edge-medium"
    } else {
        "edge-good"
    }
}

fn arrow_color(latency: f64) -> &'static str {
    if latency > 50.0 {
        "#f85149"
    } else if latency > 20.0 {
        "#d29922"
    } else {
        "#3fb950"
    }
}

fn truncate_label(label: &str, node_type: NodeType) -> String {
    let limit = match node_type {
        NodeType::Location => 10,
        NodeType::Router => 12,
    };
    if label.chars().count() > limit {
        let prefix: String = label.chars().take(limit).collect();
        format!("{prefix}...")
    } else {
        label.to_string()
    }
}

/// Placeholder document shown before the first traceroute lands.
#[must_use]
pub fn empty_document() -> String {
    r##"<?xml version="1.0" encoding="UTF-8"?>
<svg width="800" height="480" viewBox="0 0 800 480" xmlns="http://www.w3.org/2000/svg">
<rect width="100%" height="100%" fill="#0d1117"/>
<text x="400" y="240" text-anchor="middle" dominant-baseline="central" fill="#8b949e" font-family="system-ui" font-size="18">No topology data available - waiting for traceroute results...</text>
<circle cx="400" cy="280" r="3" fill="#58a6ff" opacity="0.8">
<animate attributeName="opacity" values="0.8;0.3;0.8" dur="2s" repeatCount="indefinite"/>
</circle>
</svg>"##
        .to_string()
}

const STYLE_BLOCK: &str = r##"<defs>
<style><![CDATA[
.location-node { fill: #58a6ff; stroke: #1f6feb; stroke-width: 3; cursor: pointer; transition: fill 0.2s ease, stroke 0.2s ease; }
.location-node:hover { fill: #79c0ff; stroke: #409dff; stroke-width: 4; }
.router-node { fill: #656d76; stroke: #484f58; stroke-width: 2; cursor: pointer; transition: fill 0.2s ease, stroke 0.2s ease; }
.router-node:hover { fill: #8b949e; stroke: #656d76; stroke-width: 3; }
.edge-good { stroke: #3fb950; stroke-width: 2.5; opacity: 0.8; cursor: pointer; }
.edge-good:hover { stroke: #56d364; stroke-width: 4; opacity: 1; }
.edge-medium { stroke: #d29922; stroke-width: 3; opacity: 0.85; cursor: pointer; }
.edge-medium:hover { stroke: #f2cc60; stroke-width: 5; opacity: 1; }
.edge-bad { stroke: #f85149; stroke-width: 4; opacity: 0.9; cursor: pointer; animation: pulse-red 3s infinite; }
.edge-bad:hover { stroke: #ff7b72; stroke-width: 6; opacity: 1; }
.node-label { fill: #f0f6fc; font-family: system-ui, sans-serif; font-size: 13px; font-weight: 600; text-anchor: middle; dominant-baseline: central; pointer-events: none; }
.router-label { fill: #e6edf3; font-family: system-ui, sans-serif; font-size: 10px; font-weight: 500; text-anchor: middle; dominant-baseline: central; pointer-events: none; }
.tooltip-bg { fill: #21262d; stroke: #30363d; stroke-width: 1; rx: 8; ry: 8; opacity: 0; pointer-events: none; transition: opacity 0.3s ease; }
.tooltip-text { fill: #f0f6fc; font-family: system-ui, sans-serif; font-size: 12px; pointer-events: none; opacity: 0; transition: opacity 0.3s ease; }
.latency-label { font-family: system-ui, sans-serif; opacity: 0.9; }
.edge-group:hover .latency-label { opacity: 1; font-weight: 600; }
@keyframes pulse-red { 0% { opacity: 0.9; } 50% { opacity: 0.6; } 100% { opacity: 0.9; } }
]]></style>
</defs>
"##;

const BACKGROUND_BLOCK: &str = r##"<defs>
<radialGradient id="bg-gradient" cx="50%" cy="50%" r="70%">
<stop offset="0%" style="stop-color:#161b22"/>
<stop offset="100%" style="stop-color:#0d1117"/>
</radialGradient>
</defs>
<rect width="100%" height="100%" fill="url(#bg-gradient)"/>
"##;

const SCRIPT_BLOCK: &str = r##"<script><![CDATA[
var currentZoom = 1;
var isPanning = false;
var startPoint = {x: 0, y: 0};
var currentTranslate = {x: 0, y: 0};
var svg = document.querySelector('svg');
var topologyContent = document.getElementById('topology-content');

svg.addEventListener('mousedown', startPan);
svg.addEventListener('mousemove', pan);
svg.addEventListener('mouseup', endPan);
svg.addEventListener('mouseleave', endPan);

function startPan(evt) {
    if (evt.target.closest('#zoom-controls')) return;
    isPanning = true;
    var pt = getSVGPoint(evt);
    startPoint.x = pt.x - currentTranslate.x;
    startPoint.y = pt.y - currentTranslate.y;
    svg.style.cursor = 'grabbing';
}

function pan(evt) {
    if (!isPanning) return;
    var pt = getSVGPoint(evt);
    currentTranslate.x = pt.x - startPoint.x;
    currentTranslate.y = pt.y - startPoint.y;
    updateTransform();
}

function endPan() {
    isPanning = false;
    svg.style.cursor = 'grab';
}

function getSVGPoint(evt) {
    var pt = svg.createSVGPoint();
    pt.x = evt.clientX;
    pt.y = evt.clientY;
    return pt.matrixTransform(svg.getScreenCTM().inverse());
}

function zoomIn() {
    currentZoom = Math.min(currentZoom * 1.2, 3);
    updateTransform();
}

function zoomOut() {
    currentZoom = Math.max(currentZoom / 1.2, 0.3);
    updateTransform();
}

function updateTransform() {
    topologyContent.setAttribute('transform',
        'translate(' + currentTranslate.x + ',' + currentTranslate.y + ') scale(' + currentZoom + ')');
}

function showTooltip(evt, text) {
    var tooltipBg = document.getElementById('tooltip-bg');
    var tooltipText = document.getElementById('tooltip-text');
    var pt = getSVGPoint(evt);
    tooltipText.textContent = text;
    var bbox = tooltipText.getBBox();
    var bgWidth = bbox.width + 20;
    var bgHeight = bbox.height + 16;
    var bgX = pt.x - bgWidth / 2;
    var bgY = pt.y - bgHeight - 15;
    tooltipBg.setAttribute('x', bgX);
    tooltipBg.setAttribute('y', bgY);
    tooltipBg.setAttribute('width', bgWidth);
    tooltipBg.setAttribute('height', bgHeight);
    tooltipText.setAttribute('x', bgX + 10);
    tooltipText.setAttribute('y', bgY + bgHeight / 2 + 4);
    tooltipBg.style.opacity = '0.95';
    tooltipText.style.opacity = '1';
}

function hideTooltip() {
    document.getElementById('tooltip-bg').style.opacity = '0';
    document.getElementById('tooltip-text').style.opacity = '0';
}

svg.style.cursor = 'grab';
]]></script>
"##;
