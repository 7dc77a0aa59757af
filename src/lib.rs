pub mod graph;
pub mod layout;
pub mod reconcile;
pub mod render;
pub mod surface;
pub mod utils;

pub use anyhow::{Context, Result, anyhow, bail};

pub use graph::{DiagramData, FlowGraph, FlowLink, FlowNode, GraphError};
pub use layout::{Alignment, LinkGeometry, NodeGeometry, SankeyGeometry, SankeyLayout};
pub use reconcile::{Reconciliation, reconcile};
pub use render::{DiffCounts, NodeIdentity, RenderPass, Renderer, RendererConfig};
pub use surface::{Anchor, Element, Group, Phase, Shape, Surface};

/// Default canvas extent, matching the deployment this engine was built for.
pub const DEFAULT_WIDTH: f64 = 954.0;
pub const DEFAULT_HEIGHT: f64 = 600.0;

/// Horizontal and vertical inset of the layout extent inside the canvas.
pub const EXTENT_INSET_X: f64 = 1.0;
pub const EXTENT_INSET_Y: f64 = 5.0;

pub const DEFAULT_NODE_WIDTH: f64 = 15.0;
pub const DEFAULT_NODE_PADDING: f64 = 100.0;
pub const DEFAULT_ITERATIONS: usize = 100;

/// Horizontal gap between a node rectangle and its label.
pub const LABEL_OFFSET: f64 = 6.0;

pub const LABEL_FONT_SIZE: f64 = 10.0;

/// Default duration of one enter/update/exit transition frame.
pub const DEFAULT_TRANSITION_MS: u64 = 250;
