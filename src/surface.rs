use std::collections::HashMap;
use std::fmt::Write as FmtWrite;

use crate::utils::escape_xml;
use crate::{LABEL_FONT_SIZE, Result};

/// Lifecycle phase of a surface element within one transition frame.
///
/// Elements carry their state as of the start of the frame; `settle`
/// commits the frame's end state (entering elements become visible,
/// exiting elements are removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Entering,
    Visible,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
}

impl Anchor {
    fn as_str(self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        fill: String,
    },
    Ribbon {
        d: String,
        stroke: String,
        stroke_width: f64,
    },
    Label {
        x: f64,
        y: f64,
        anchor: Anchor,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub shape: Shape,
    /// Tooltip text rendered as a `<title>` child.
    pub title: Option<String>,
    pub opacity: f64,
    pub phase: Phase,
}

/// One keyed element collection. Keys map to elements; `order` preserves
/// insertion order so serialization and diffing stay deterministic.
#[derive(Debug, Clone, Default)]
pub struct Group {
    order: Vec<String>,
    elements: HashMap<String, Element>,
}

impl Group {
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.elements.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Element> {
        self.elements.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Element> {
        self.elements.get_mut(key)
    }

    pub fn insert(&mut self, key: String, element: Element) {
        if self.elements.insert(key.clone(), element).is_none() {
            self.order.push(key);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Element> {
        let removed = self.elements.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.elements.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.order
            .iter()
            .filter_map(|k| self.elements.get(k).map(|e| (k.as_str(), e)))
    }

    fn settle(&mut self) {
        let exiting: Vec<String> = self
            .iter()
            .filter(|(_, e)| e.phase == Phase::Exiting)
            .map(|(k, _)| k.to_string())
            .collect();
        for key in exiting {
            self.remove(&key);
        }
        for key in &self.order {
            if let Some(element) = self.elements.get_mut(key) {
                if element.phase == Phase::Entering {
                    element.phase = Phase::Visible;
                    element.opacity = 1.0;
                }
            }
        }
    }
}

/// Persistent drawing surface: a fixed-extent canvas partitioned into three
/// named element groups that survive across renders. The renderer mutates
/// these groups; nothing here knows about flow graphs.
#[derive(Debug, Clone)]
pub struct Surface {
    width: f64,
    height: f64,
    pub nodes: Group,
    pub links: Group,
    pub labels: Group,
}

impl Surface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            nodes: Group::default(),
            links: Group::default(),
            labels: Group::default(),
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty() && self.labels.is_empty()
    }

    /// Immediate wipe of all three collections, for the empty-snapshot case.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.labels.clear();
    }

    /// Commits the end state of the current transition frame: entering
    /// elements become fully visible, exiting elements are removed.
    pub fn settle(&mut self) {
        self.nodes.settle();
        self.links.settle();
        self.labels.settle();
    }

    /// Serializes the current element tree as a standalone SVG document,
    /// mirroring the group structure the renderer maintains.
    pub fn to_svg(&self) -> Result<String> {
        let mut svg = String::new();
        write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {:.0} {:.0}">"#,
            self.width, self.height
        )?;
        svg.push('\n');

        svg.push_str("  <g class=\"nodes\">\n");
        for (_, element) in self.nodes.iter() {
            if let Shape::Rect {
                x,
                y,
                width,
                height,
                fill,
            } = &element.shape
            {
                write!(
                    svg,
                    "    <rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{width:.1}\" height=\"{height:.1}\" fill=\"{}\"{}>",
                    escape_xml(fill),
                    opacity_attr(element.opacity)
                )?;
                write_title(&mut svg, element)?;
                svg.push_str("</rect>\n");
            }
        }
        svg.push_str("  </g>\n");

        svg.push_str("  <g class=\"edges\" fill=\"none\" stroke-opacity=\"0.5\" style=\"mix-blend-mode: multiply\">\n");
        for (_, element) in self.links.iter() {
            if let Shape::Ribbon {
                d,
                stroke,
                stroke_width,
            } = &element.shape
            {
                write!(
                    svg,
                    "    <path d=\"{d}\" stroke=\"{}\" stroke-width=\"{stroke_width:.1}\"{}>",
                    escape_xml(stroke),
                    opacity_attr(element.opacity)
                )?;
                write_title(&mut svg, element)?;
                svg.push_str("</path>\n");
            }
        }
        svg.push_str("  </g>\n");

        write!(
            svg,
            "  <g class=\"texts\" font-family=\"sans-serif\" font-size=\"{LABEL_FONT_SIZE:.0}\">\n"
        )?;
        for (_, element) in self.labels.iter() {
            if let Shape::Label { x, y, anchor, text } = &element.shape {
                write!(
                    svg,
                    "    <text x=\"{x:.1}\" y=\"{y:.1}\" dy=\"0.35em\" text-anchor=\"{}\"{}>{}</text>\n",
                    anchor.as_str(),
                    opacity_attr(element.opacity),
                    escape_xml(text)
                )?;
            }
        }
        svg.push_str("  </g>\n</svg>\n");

        Ok(svg)
    }
}

fn opacity_attr(opacity: f64) -> String {
    if opacity < 1.0 {
        format!(" opacity=\"{opacity:.2}\"")
    } else {
        String::new()
    }
}

fn write_title(svg: &mut String, element: &Element) -> Result<()> {
    if let Some(title) = &element.title {
        write!(svg, "<title>{}</title>", escape_xml(title))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(fill: &str) -> Element {
        Element {
            shape: Shape::Rect {
                x: 1.0,
                y: 2.0,
                width: 15.0,
                height: 40.0,
                fill: fill.to_string(),
            },
            title: Some("Coal\n10".to_string()),
            opacity: 0.0,
            phase: Phase::Entering,
        }
    }

    #[test]
    fn settle_promotes_entering_and_drops_exiting() {
        let mut surface = Surface::new(100.0, 100.0);
        surface.nodes.insert("a".to_string(), rect("#111"));
        let mut gone = rect("#222");
        gone.phase = Phase::Exiting;
        gone.opacity = 1.0;
        surface.nodes.insert("b".to_string(), gone);

        surface.settle();

        assert_eq!(surface.nodes.len(), 1);
        let a = surface.nodes.get("a").unwrap();
        assert_eq!(a.phase, Phase::Visible);
        assert_eq!(a.opacity, 1.0);
        assert!(!surface.nodes.contains("b"));
    }

    #[test]
    fn insert_preserves_order_and_replaces_in_place() {
        let mut group = Group::default();
        group.insert("x".to_string(), rect("#111"));
        group.insert("y".to_string(), rect("#222"));
        group.insert("x".to_string(), rect("#333"));

        assert_eq!(group.keys(), ["x", "y"]);
        match &group.get("x").unwrap().shape {
            Shape::Rect { fill, .. } => assert_eq!(fill, "#333"),
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn svg_snapshot_contains_three_groups() {
        let mut surface = Surface::new(954.0, 600.0);
        let mut visible = rect("#abc");
        visible.phase = Phase::Visible;
        visible.opacity = 1.0;
        surface.nodes.insert("a".to_string(), visible);

        let svg = surface.to_svg().unwrap();
        assert!(svg.contains("class=\"nodes\""));
        assert!(svg.contains("class=\"edges\""));
        assert!(svg.contains("class=\"texts\""));
        assert!(svg.contains("<title>Coal\n10</title>"));
        assert!(!svg.contains("opacity=\"0.00\""));
    }

    #[test]
    fn hidden_elements_serialize_with_their_opacity() {
        let mut surface = Surface::new(10.0, 10.0);
        surface.nodes.insert("a".to_string(), rect("#abc"));
        let svg = surface.to_svg().unwrap();
        assert!(svg.contains("opacity=\"0.00\""));
    }
}
