//! Flowchart diagrams: a subset of the `graph`/`flowchart` syntax laid out in
//! layers and drawn as SVG.
//!
//! ```text
//! graph LR
//!     A[Write post] --> B{Has diagram?}
//!     B -->|yes| C((Render SVG))
//!     B -.-> D(Plain HTML)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;

use super::DiagramError;

const NODE_HEIGHT: f64 = 40.0;
const CHAR_WIDTH: f64 = 8.0;
const NODE_PADDING: f64 = 24.0;
const MIN_NODE_WIDTH: f64 = 60.0;
const LAYER_GAP: f64 = 60.0;
const NODE_GAP: f64 = 40.0;
const MARGIN: f64 = 40.0;
const LOOP_REACH: f64 = 30.0;

/// Diagram kinds of the same family that this renderer does not draw.
const OTHER_KINDS: &[&str] = &[
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
    "mindmap",
    "timeline",
    "quadrantChart",
    "requirementDiagram",
    "sankey-beta",
    "xychart-beta",
    "block-beta",
];

static NODE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+").unwrap());
static EDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-\.+->|-\.+-|={2,}>|={3,}|-{2,}>|-{3,})\s*(?:\|([^|]*)\|)?").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TopDown,
    BottomUp,
    LeftRight,
    RightLeft,
}

impl Direction {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "TD" | "TB" => Some(Direction::TopDown),
            "BT" => Some(Direction::BottomUp),
            "LR" => Some(Direction::LeftRight),
            "RL" => Some(Direction::RightLeft),
            _ => None,
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, Direction::LeftRight | Direction::RightLeft)
    }

    fn is_reversed(self) -> bool {
        matches!(self, Direction::BottomUp | Direction::RightLeft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Box,
    Round,
    Diamond,
    Circle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stroke {
    Solid,
    Dotted,
    Thick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub stroke: Stroke,
    pub arrow: bool,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flowchart {
    pub direction: Direction,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

fn syntax_error(line: usize, message: impl Into<String>) -> DiagramError {
    DiagramError::Syntax {
        line,
        message: message.into(),
    }
}

/// Parse a flowchart definition. A missing header means `graph TD`.
pub fn parse(source: &str) -> Result<Flowchart, DiagramError> {
    let mut builder = Builder::default();
    let mut direction = None;
    let mut seen_statement = false;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }

        for statement in line.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if !seen_statement {
                seen_statement = true;
                let mut words = statement.split_whitespace();
                let first = words.next().unwrap_or_default();
                if first == "graph" || first == "flowchart" {
                    let parsed = match words.next() {
                        None => Direction::TopDown,
                        Some(token) => Direction::parse(token).ok_or_else(|| {
                            syntax_error(line_no, format!("unknown direction `{token}`"))
                        })?,
                    };
                    direction = Some(parsed);
                    continue;
                }
                if OTHER_KINDS.contains(&first) {
                    return Err(DiagramError::UnsupportedKind(first.to_string()));
                }
            }
            builder.statement(statement, line_no)?;
        }
    }

    if builder.nodes.is_empty() {
        return Err(DiagramError::Empty);
    }

    Ok(Flowchart {
        direction: direction.unwrap_or(Direction::TopDown),
        nodes: builder.nodes,
        edges: builder.edges,
    })
}

#[derive(Default)]
struct Builder {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl Builder {
    /// `node (edge node)*`
    fn statement(&mut self, text: &str, line: usize) -> Result<(), DiagramError> {
        let (mut from, rest) = self.node_ref(text, line)?;
        let mut rest = rest.trim_start();

        while !rest.is_empty() {
            let caps = EDGE
                .captures(rest)
                .ok_or_else(|| syntax_error(line, format!("expected an edge at `{rest}`")))?;
            let (stroke, arrow) = classify_edge(&caps[1]);
            let label = caps
                .get(2)
                .map(|m| unquote(m.as_str().trim()).to_string())
                .filter(|l| !l.is_empty());

            let (to, tail) = self.node_ref(rest[caps[0].len()..].trim_start(), line)?;
            self.edges.push(Edge {
                from,
                to,
                stroke,
                arrow,
                label,
            });
            from = to;
            rest = tail.trim_start();
        }
        Ok(())
    }

    fn node_ref<'t>(&mut self, text: &'t str, line: usize) -> Result<(usize, &'t str), DiagramError> {
        let id = NODE_ID
            .find(text)
            .ok_or_else(|| syntax_error(line, format!("expected a node id at `{text}`")))?
            .as_str();
        let (shape, rest) = parse_shape(&text[id.len()..]).map_err(|m| syntax_error(line, m))?;
        Ok((self.intern(id, shape), rest))
    }

    /// Register a node, updating its label and shape if this reference declares them.
    fn intern(&mut self, id: &str, shape: Option<(Shape, String)>) -> usize {
        let index = match self.index.get(id) {
            Some(&index) => index,
            None => {
                self.nodes.push(Node {
                    id: id.to_string(),
                    label: id.to_string(),
                    shape: Shape::Box,
                });
                self.index.insert(id.to_string(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        if let Some((shape, label)) = shape {
            self.nodes[index].shape = shape;
            self.nodes[index].label = label;
        }
        index
    }
}

fn parse_shape(text: &str) -> Result<(Option<(Shape, String)>, &str), String> {
    const SHAPES: [(&str, &str, Shape); 4] = [
        ("((", "))", Shape::Circle),
        ("(", ")", Shape::Round),
        ("[", "]", Shape::Box),
        ("{", "}", Shape::Diamond),
    ];

    for (open, close, shape) in SHAPES {
        if let Some(inner) = text.strip_prefix(open) {
            let end = inner
                .find(close)
                .ok_or_else(|| format!("unclosed `{open}` in node label"))?;
            let label = unquote(inner[..end].trim()).to_string();
            return Ok((Some((shape, label)), &inner[end + close.len()..]));
        }
    }
    Ok((None, text))
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

fn classify_edge(op: &str) -> (Stroke, bool) {
    let arrow = op.ends_with('>');
    let stroke = if op.contains('.') {
        Stroke::Dotted
    } else if op.starts_with('=') {
        Stroke::Thick
    } else {
        Stroke::Solid
    };
    (stroke, arrow)
}

/// Layer of each node: longest-path distance from a root, ignoring edges that close cycles.
pub fn layers(chart: &Flowchart) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let n = chart.nodes.len();
    let mut adjacency = vec![Vec::new(); n];
    for edge in chart.edges.iter().filter(|e| e.from != e.to) {
        adjacency[edge.from].push(edge.to);
    }

    let mut marks = vec![Mark::New; n];
    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); n];
    for root in 0..n {
        if marks[root] != Mark::New {
            continue;
        }
        marks[root] = Mark::Active;
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            match adjacency[node].get(cursor) {
                Some(&child) => {
                    top.1 += 1;
                    match marks[child] {
                        Mark::Active => {}
                        Mark::Done => forward[node].push(child),
                        Mark::New => {
                            forward[node].push(child);
                            marks[child] = Mark::Active;
                            stack.push((child, 0));
                        }
                    }
                }
                None => {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
    }

    let mut indegree = vec![0usize; n];
    for &to in forward.iter().flatten() {
        indegree[to] += 1;
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&v| indegree[v] == 0).collect();
    let mut layer = vec![0usize; n];
    while let Some(v) = queue.pop_front() {
        for &w in &forward[v] {
            layer[w] = layer[w].max(layer[v] + 1);
            indegree[w] -= 1;
            if indegree[w] == 0 {
                queue.push_back(w);
            }
        }
    }
    layer
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub width: f64,
    pub height: f64,
    pub boxes: Vec<NodeBox>,
}

fn node_size(node: &Node) -> (f64, f64) {
    let text = node.label.chars().count() as f64 * CHAR_WIDTH + NODE_PADDING;
    match node.shape {
        Shape::Box | Shape::Round => (text.max(MIN_NODE_WIDTH), NODE_HEIGHT),
        Shape::Diamond => (text.max(MIN_NODE_WIDTH) + NODE_PADDING, NODE_HEIGHT * 1.5),
        Shape::Circle => {
            let diameter = text.max(NODE_HEIGHT);
            (diameter, diameter)
        }
    }
}

pub fn layout(chart: &Flowchart) -> Layout {
    let layer_of = layers(chart);
    let layer_count = layer_of.iter().max().map_or(0, |&l| l + 1);
    let sizes: Vec<(f64, f64)> = chart.nodes.iter().map(node_size).collect();
    let horizontal = chart.direction.is_horizontal();

    // "main" runs across layers, "cross" runs along a layer.
    let main_extent = |(w, h): (f64, f64)| if horizontal { w } else { h };
    let cross_extent = |(w, h): (f64, f64)| if horizontal { h } else { w };

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); layer_count];
    for (node, &layer) in layer_of.iter().enumerate() {
        members[layer].push(node);
    }

    let thickness: Vec<f64> = members
        .iter()
        .map(|m| m.iter().map(|&i| main_extent(sizes[i])).fold(0.0, f64::max))
        .collect();
    let span: Vec<f64> = members
        .iter()
        .map(|m| {
            m.iter().map(|&i| cross_extent(sizes[i])).sum::<f64>()
                + NODE_GAP * m.len().saturating_sub(1) as f64
        })
        .collect();
    let cross_total = span.iter().copied().fold(0.0, f64::max);
    let main_total = thickness.iter().sum::<f64>() + LAYER_GAP * layer_count.saturating_sub(1) as f64;

    let mut boxes = vec![
        NodeBox {
            cx: 0.0,
            cy: 0.0,
            width: 0.0,
            height: 0.0
        };
        chart.nodes.len()
    ];
    let mut main_cursor = 0.0;
    for (layer, nodes) in members.iter().enumerate() {
        let main_center = main_cursor + thickness[layer] / 2.0;
        let main = if chart.direction.is_reversed() {
            main_total - main_center
        } else {
            main_center
        };
        let mut cross_cursor = (cross_total - span[layer]) / 2.0;
        for &i in nodes {
            let extent = cross_extent(sizes[i]);
            let cross = cross_cursor + extent / 2.0;
            cross_cursor += extent + NODE_GAP;
            let (cx, cy) = if horizontal { (main, cross) } else { (cross, main) };
            boxes[i] = NodeBox {
                cx: cx + MARGIN,
                cy: cy + MARGIN,
                width: sizes[i].0,
                height: sizes[i].1,
            };
        }
        main_cursor += thickness[layer] + LAYER_GAP;
    }

    let (width, height) = if horizontal {
        (main_total, cross_total)
    } else {
        (cross_total, main_total)
    };
    Layout {
        width: width + 2.0 * MARGIN,
        height: height + 2.0 * MARGIN,
        boxes,
    }
}

/// Point where the segment from the node center toward `target` leaves the node outline.
fn boundary_point(node: &NodeBox, shape: Shape, target: (f64, f64)) -> (f64, f64) {
    let (dx, dy) = (target.0 - node.cx, target.1 - node.cy);
    if dx == 0.0 && dy == 0.0 {
        return (node.cx, node.cy);
    }
    let (half_w, half_h) = (node.width / 2.0, node.height / 2.0);
    let t = match shape {
        Shape::Circle => half_w / dx.hypot(dy),
        Shape::Diamond => 1.0 / (dx.abs() / half_w + dy.abs() / half_h),
        Shape::Box | Shape::Round => {
            let tx = if dx != 0.0 { half_w / dx.abs() } else { f64::INFINITY };
            let ty = if dy != 0.0 { half_h / dy.abs() } else { f64::INFINITY };
            tx.min(ty)
        }
    };
    (node.cx + dx * t, node.cy + dy * t)
}

fn escape(text: &str) -> String {
    htmlescape::encode_minimal(text)
}

/// Draw the chart as a standalone `<svg>` element. `id` namespaces the element ids.
pub fn render_svg(chart: &Flowchart, id: &str) -> String {
    let layout = layout(chart);
    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" id=\"{id}-svg\" class=\"diagram-svg\" viewBox=\"0 0 {w:.1} {h:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" role=\"img\">",
        w = layout.width,
        h = layout.height,
    );
    svg.push_str(&format!(
        "<defs><marker id=\"{id}-arrow\" viewBox=\"0 0 10 10\" refX=\"10\" refY=\"5\" markerWidth=\"8\" markerHeight=\"8\" orient=\"auto-start-reverse\"><path d=\"M 0 0 L 10 5 L 0 10 z\" fill=\"#333\"/></marker></defs>"
    ));

    for edge in &chart.edges {
        svg.push_str(&render_edge(chart, &layout, edge, id));
    }
    for (node, bounds) in chart.nodes.iter().zip(&layout.boxes) {
        svg.push_str(&render_node(node, bounds));
    }

    svg.push_str("</svg>");
    svg
}

fn render_edge(chart: &Flowchart, layout: &Layout, edge: &Edge, id: &str) -> String {
    let from = &layout.boxes[edge.from];
    let to = &layout.boxes[edge.to];
    let width = if edge.stroke == Stroke::Thick { 3.0 } else { 1.5 };
    let dash = if edge.stroke == Stroke::Dotted {
        " stroke-dasharray=\"5,4\""
    } else {
        ""
    };
    let marker = if edge.arrow {
        format!(" marker-end=\"url(#{id}-arrow)\"")
    } else {
        String::new()
    };

    let (mut out, label_at) = if edge.from == edge.to {
        let x = from.cx + from.width / 2.0;
        let path = format!(
            "<path d=\"M {x:.1} {y1:.1} C {cx:.1} {c1:.1}, {cx:.1} {c2:.1}, {x:.1} {y2:.1}\" fill=\"none\" stroke=\"#333\" stroke-width=\"{width}\"{dash}{marker}/>",
            y1 = from.cy - 8.0,
            y2 = from.cy + 8.0,
            cx = x + LOOP_REACH,
            c1 = from.cy - LOOP_REACH,
            c2 = from.cy + LOOP_REACH,
        );
        (path, (x + LOOP_REACH, from.cy))
    } else {
        let start = boundary_point(from, chart.nodes[edge.from].shape, (to.cx, to.cy));
        let end = boundary_point(to, chart.nodes[edge.to].shape, (from.cx, from.cy));
        let line = format!(
            "<line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#333\" stroke-width=\"{width}\"{dash}{marker}/>",
            start.0, start.1, end.0, end.1
        );
        (line, ((start.0 + end.0) / 2.0, (start.1 + end.1) / 2.0))
    };

    if let Some(label) = &edge.label {
        out.push_str(&format!(
            "<text x=\"{:.1}\" y=\"{:.1}\" class=\"diagram-edge-label\" text-anchor=\"middle\" dominant-baseline=\"middle\" font-size=\"12\" fill=\"#555\">{}</text>",
            label_at.0,
            label_at.1,
            escape(label)
        ));
    }
    out
}

fn render_node(node: &Node, b: &NodeBox) -> String {
    let style = "fill=\"#f6f8fa\" stroke=\"#333\" stroke-width=\"1.5\"";
    let (left, top) = (b.cx - b.width / 2.0, b.cy - b.height / 2.0);
    let outline = match node.shape {
        Shape::Box => format!(
            "<rect x=\"{left:.1}\" y=\"{top:.1}\" width=\"{:.1}\" height=\"{:.1}\" {style}/>",
            b.width, b.height
        ),
        Shape::Round => format!(
            "<rect x=\"{left:.1}\" y=\"{top:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"12\" ry=\"12\" {style}/>",
            b.width, b.height
        ),
        Shape::Diamond => format!(
            "<polygon points=\"{:.1},{top:.1} {:.1},{:.1} {:.1},{:.1} {left:.1},{:.1}\" {style}/>",
            b.cx,
            left + b.width,
            b.cy,
            b.cx,
            top + b.height,
            b.cy
        ),
        Shape::Circle => format!(
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"{:.1}\" {style}/>",
            b.cx,
            b.cy,
            b.width / 2.0
        ),
    };
    format!(
        "<g class=\"diagram-node\" data-node=\"{}\">{outline}<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" dominant-baseline=\"middle\" font-size=\"14\">{}</text></g>",
        escape(&node.id),
        b.cx,
        b.cy,
        escape(&node.label)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_edge_as_top_down() {
        let chart = parse("A-->B").unwrap();
        assert_eq!(chart.direction, Direction::TopDown);
        assert_eq!(chart.nodes.len(), 2);
        assert_eq!(
            chart.edges,
            vec![Edge {
                from: 0,
                to: 1,
                stroke: Stroke::Solid,
                arrow: true,
                label: None
            }]
        );
    }

    #[test]
    fn parses_shapes_labels_and_chains() {
        let source = "graph LR\n  A[Start] --> B{Ok?}\n  B -->|yes| C((Done)) --- D(\"Side note\")\n  %% comment\n  B -.-> A; A ==> D";
        let chart = parse(source).unwrap();
        assert_eq!(chart.direction, Direction::LeftRight);

        let labels: Vec<(&str, Shape)> = chart
            .nodes
            .iter()
            .map(|n| (n.label.as_str(), n.shape))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Start", Shape::Box),
                ("Ok?", Shape::Diamond),
                ("Done", Shape::Circle),
                ("Side note", Shape::Round),
            ]
        );

        assert_eq!(chart.edges.len(), 5);
        assert_eq!(chart.edges[1].label.as_deref(), Some("yes"));
        assert!(!chart.edges[2].arrow);
        assert_eq!(chart.edges[3].stroke, Stroke::Dotted);
        assert_eq!(chart.edges[4].stroke, Stroke::Thick);
    }

    #[test]
    fn rejects_other_diagram_kinds() {
        let err = parse("sequenceDiagram\n  Alice->>Bob: Hi").unwrap_err();
        assert_eq!(err, DiagramError::UnsupportedKind("sequenceDiagram".into()));
    }

    #[test]
    fn reports_syntax_errors_with_line() {
        let err = parse("graph TD\nA --> ").unwrap_err();
        assert!(matches!(err, DiagramError::Syntax { line: 2, .. }));

        let err = parse("graph XY\nA-->B").unwrap_err();
        assert!(matches!(err, DiagramError::Syntax { line: 1, .. }));
    }

    #[test]
    fn empty_definition_is_an_error() {
        assert_eq!(parse("graph TD\n%% nothing").unwrap_err(), DiagramError::Empty);
    }

    #[test]
    fn layers_follow_longest_path_and_survive_cycles() {
        let chart = parse("A-->B\nB-->C\nA-->C\nC-->A").unwrap();
        assert_eq!(layers(&chart), vec![0, 1, 2]);
    }

    #[test]
    fn layout_flows_in_declared_direction() {
        let down = layout(&parse("graph TD\nA-->B").unwrap());
        assert!(down.boxes[1].cy > down.boxes[0].cy);

        let up = layout(&parse("graph BT\nA-->B").unwrap());
        assert!(up.boxes[1].cy < up.boxes[0].cy);

        let right = layout(&parse("graph LR\nA-->B").unwrap());
        assert!(right.boxes[1].cx > right.boxes[0].cx);
        assert!(right.width > right.height);
    }

    #[test]
    fn svg_uses_namespaced_ids_and_escapes_labels() {
        let chart = parse("A[\"a < b\"]-->B").unwrap();
        let svg = render_svg(&chart, "diagram-7");
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("id=\"diagram-7-svg\""));
        assert!(svg.contains("url(#diagram-7-arrow)"));
        assert!(svg.contains("a &lt; b"));
        assert!(svg.ends_with("</svg>"));
    }
}
