use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::graph::{DiagramData, FlowGraph, GraphError};
use crate::layout::{Alignment, LinkGeometry, NodeGeometry, SankeyGeometry, SankeyLayout};
use crate::reconcile::reconcile;
use crate::surface::{Anchor, Element, Group, Phase, Shape, Surface};
use crate::utils::format_value;
use crate::{
    DEFAULT_HEIGHT, DEFAULT_ITERATIONS, DEFAULT_NODE_PADDING, DEFAULT_NODE_WIDTH,
    DEFAULT_TRANSITION_MS, DEFAULT_WIDTH, LABEL_OFFSET, Result,
};

/// Which node attribute anchors visual identity across snapshots. An
/// unstable choice degrades updates into spurious enter/exit animation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeIdentity {
    #[default]
    Id,
    Title,
    Color,
}

impl NodeIdentity {
    pub fn key_of(self, node: &NodeGeometry) -> String {
        match self {
            NodeIdentity::Id => node.id.clone(),
            NodeIdentity::Title => node.title.clone(),
            NodeIdentity::Color => node.color.clone(),
        }
    }
}

/// Fixed at renderer construction; never varies per frame.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub width: f64,
    pub height: f64,
    pub node_width: f64,
    pub node_padding: f64,
    pub align: Alignment,
    pub iterations: usize,
    pub transition: Duration,
    pub node_identity: NodeIdentity,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            node_width: DEFAULT_NODE_WIDTH,
            node_padding: DEFAULT_NODE_PADDING,
            align: Alignment::default(),
            iterations: DEFAULT_ITERATIONS,
            transition: Duration::from_millis(DEFAULT_TRANSITION_MS),
            node_identity: NodeIdentity::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffCounts {
    pub entered: usize,
    pub updated: usize,
    pub exited: usize,
}

/// Summary of one reconciliation pass, per element collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderPass {
    pub nodes: DiffCounts,
    pub links: DiffCounts,
    pub labels: DiffCounts,
    /// Set when an empty snapshot wiped the surface without animation.
    pub cleared: bool,
}

/// Tracks the in-flight transition frame. A new pass interrupts whatever
/// the previous one left running before scheduling its own completion.
#[derive(Debug, Default)]
struct Animator {
    tasks: Vec<JoinHandle<()>>,
}

impl Animator {
    fn interrupt(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn schedule_settle(&mut self, delay: Duration, surface: Arc<Mutex<Surface>>) {
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock_surface(&surface).settle();
        }));
    }
}

/// Keyed enter/update/exit renderer over a persistent surface.
///
/// Owns the element lifecycle only; graph data stays with the caller and
/// geometry stays with the layout engine. Rendering the same snapshot twice
/// is idempotent apart from restarting the transition frame.
pub struct Renderer {
    config: RendererConfig,
    layout: SankeyLayout,
    surface: Arc<Mutex<Surface>>,
    animator: Animator,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        let layout = SankeyLayout::new(config.width, config.height)
            .node_width(config.node_width)
            .node_padding(config.node_padding)
            .align(config.align)
            .iterations(config.iterations);
        let surface = Arc::new(Mutex::new(Surface::new(config.width, config.height)));
        Self {
            config,
            layout,
            surface,
            animator: Animator::default(),
        }
    }

    /// Shared handle to the drawing surface, for hosts that embed the
    /// rendered tree elsewhere or snapshot it between frames.
    pub fn surface(&self) -> Arc<Mutex<Surface>> {
        Arc::clone(&self.surface)
    }

    pub fn svg(&self) -> Result<String> {
        lock_surface(&self.surface).to_svg()
    }

    /// Processes snapshots in arrival order until the producer closes the
    /// channel. Each received value fully replaces the displayed diagram.
    /// A malformed snapshot keeps the prior visual state on screen; the
    /// loop stays alive so the next valid snapshot still renders.
    pub async fn run(mut self, mut rx: mpsc::Receiver<DiagramData>) -> Result<()> {
        while let Some(data) = rx.recv().await {
            let _ = self.render(&data);
        }
        Ok(())
    }

    /// One reconciliation pass: layout the snapshot, diff each collection
    /// against what the surface currently shows, apply enter/update/exit,
    /// and schedule the shared transition completion.
    pub fn render(&mut self, data: &DiagramData) -> Result<RenderPass> {
        self.animator.interrupt();

        let graph = FlowGraph::new(data)?;

        if graph.is_empty() {
            let mut surface = lock_surface(&self.surface);
            let pass = RenderPass {
                nodes: exit_all(&surface.nodes),
                links: exit_all(&surface.links),
                labels: exit_all(&surface.labels),
                cleared: true,
            };
            surface.clear();
            return Ok(pass);
        }

        let geometry = self.layout.compute(&graph)?;
        let frame = self.build_frame(&geometry)?;

        let mut surface = lock_surface(&self.surface);
        let pass = RenderPass {
            nodes: apply(&mut surface.nodes, frame.nodes),
            links: apply(&mut surface.links, frame.links),
            labels: apply(&mut surface.labels, frame.labels),
            cleared: false,
        };
        drop(surface);

        self.animator
            .schedule_settle(self.config.transition, Arc::clone(&self.surface));
        Ok(pass)
    }

    fn build_frame(&self, geometry: &SankeyGeometry) -> Result<Frame> {
        let node_keys: Vec<String> = geometry
            .nodes
            .iter()
            .map(|n| self.config.node_identity.key_of(n))
            .collect();

        let mut seen = HashSet::new();
        for key in &node_keys {
            if !seen.insert(key.as_str()) {
                return Err(GraphError::AmbiguousKey(key.clone()).into());
            }
        }

        let mut frame = Frame::default();
        let center = self.config.width / 2.0;

        for (node, key) in geometry.nodes.iter().zip(&node_keys) {
            frame.nodes.push((
                key.clone(),
                Element {
                    shape: Shape::Rect {
                        x: node.x0,
                        y: node.y0,
                        width: node.x1 - node.x0,
                        height: node.y1 - node.y0,
                        fill: node.color.clone(),
                    },
                    title: Some(node_tooltip(geometry, node)),
                    opacity: 1.0,
                    phase: Phase::Visible,
                },
            ));

            // Keep labels inside the canvas for nodes near either edge.
            let (x, anchor) = if (node.x0 + node.x1) / 2.0 < center {
                (node.x1 + LABEL_OFFSET, Anchor::Start)
            } else {
                (node.x0 - LABEL_OFFSET, Anchor::End)
            };
            frame.labels.push((
                key.clone(),
                Element {
                    shape: Shape::Label {
                        x,
                        y: (node.y0 + node.y1) / 2.0,
                        anchor,
                        text: node.title.clone(),
                    },
                    title: None,
                    opacity: 1.0,
                    phase: Phase::Visible,
                },
            ));
        }

        for link in &geometry.links {
            let source = &geometry.nodes[link.source];
            let target = &geometry.nodes[link.target];
            // Links have no id of their own; the source key plus the link's
            // input-order ordinal among that source's outgoing links is
            // stable even when values or layout order change.
            let key = format!("{}:{}", node_keys[link.source], link.ordinal);
            frame.links.push((
                key,
                Element {
                    shape: Shape::Ribbon {
                        d: ribbon_path(source, target, link),
                        stroke: source.color.clone(),
                        stroke_width: link.width.max(1.0),
                    },
                    title: Some(link_tooltip(source, target, link)),
                    opacity: 1.0,
                    phase: Phase::Visible,
                },
            ));
        }

        Ok(frame)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.animator.interrupt();
    }
}

#[derive(Debug, Default)]
struct Frame {
    nodes: Vec<(String, Element)>,
    links: Vec<(String, Element)>,
    labels: Vec<(String, Element)>,
}

fn lock_surface(surface: &Mutex<Surface>) -> MutexGuard<'_, Surface> {
    match surface.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn exit_all(group: &Group) -> DiffCounts {
    DiffCounts {
        exited: group.len(),
        ..DiffCounts::default()
    }
}

// Entered elements start hidden; an overwrite revives a still-exiting key;
// exited elements wait for the frame to settle before removal.
fn apply(group: &mut Group, desired: Vec<(String, Element)>) -> DiffCounts {
    let next_keys: Vec<String> = desired.iter().map(|(key, _)| key.clone()).collect();
    let diff = reconcile(group.keys(), &next_keys);

    let entered: HashSet<&str> = diff.entered.iter().map(String::as_str).collect();
    for (key, mut element) in desired {
        if entered.contains(key.as_str()) {
            element.opacity = 0.0;
            element.phase = Phase::Entering;
        }
        group.insert(key, element);
    }
    for key in &diff.exited {
        if let Some(element) = group.get_mut(key) {
            element.phase = Phase::Exiting;
        }
    }

    DiffCounts {
        entered: diff.entered.len(),
        updated: diff.updated.len(),
        exited: diff.exited.len(),
    }
}

fn ribbon_path(source: &NodeGeometry, target: &NodeGeometry, link: &LinkGeometry) -> String {
    let x0 = source.x1;
    let x1 = target.x0;
    let xm = (x0 + x1) / 2.0;
    format!(
        "M{x0:.1},{y0:.1}C{xm:.1},{y0:.1} {xm:.1},{y1:.1} {x1:.1},{y1:.1}",
        y0 = link.y0,
        y1 = link.y1
    )
}

// Title, value, inbound flows, outbound flows, annotation.
fn node_tooltip(geometry: &SankeyGeometry, node: &NodeGeometry) -> String {
    let mut text = format!("{}\n{}", node.title, format_value(node.value));
    for &li in &node.incoming {
        let link = &geometry.links[li];
        text.push_str(&format!(
            "\n{} → {} ({})",
            geometry.nodes[link.source].title,
            node.title,
            format_value(link.value)
        ));
    }
    for &li in &node.outgoing {
        let link = &geometry.links[li];
        text.push_str(&format!(
            "\n{} → {} ({})",
            node.title,
            geometry.nodes[link.target].title,
            format_value(link.value)
        ));
    }
    if let Some(extra) = &node.extra {
        if !extra.is_empty() {
            text.push('\n');
            text.push_str(extra);
        }
    }
    text
}

fn link_tooltip(source: &NodeGeometry, target: &NodeGeometry, link: &LinkGeometry) -> String {
    let heading = link
        .title
        .clone()
        .unwrap_or_else(|| format!("{} → {}", source.title, target.title));
    format!("{heading}\n{}", format_value(link.value))
}
