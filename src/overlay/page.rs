/// Host page abstraction
///
/// The overlay lives in a DOM generated by someone else's client-side code.
/// The controller only needs four things from it: the current path, whether
/// the anchor exists yet, splicing the overlay in, and removing its own
/// previous insertions.
use crate::{
    error::{AppError, AppResult},
    overlay::container::OverlayElement,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

/// Where the overlay goes: a parent selector and the child it is inserted before
///
/// The anchor only counts as present once the parent has a child at
/// `child_index`, which is how "the host page finished its layout" is
/// detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorDescriptor {
    pub selector: String,
    pub child_index: usize,
}

impl AnchorDescriptor {
    pub fn new(selector: impl Into<String>, child_index: usize) -> Self {
        Self {
            selector: selector.into(),
            child_index,
        }
    }
}

/// Opaque reference to a parent element found by an anchor query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentHandle(pub String);

/// DOM operations the controller is allowed to perform
pub trait HostPage: Send + Sync {
    /// Path of the current location (`location.pathname`)
    fn path(&self) -> String;

    /// Returns the parent if the anchor is present
    fn query_anchor(&self, anchor: &AnchorDescriptor) -> Option<ParentHandle>;

    /// Inserts the overlay before the child at `index`
    fn insert_overlay(
        &self,
        parent: &ParentHandle,
        index: usize,
        overlay: OverlayElement,
    ) -> AppResult<()>;

    /// Removes every overlay carrying `marker`, returns how many were removed
    fn remove_overlays(&self, marker: &str) -> usize;
}

/// A child of a parent element of the virtual page
#[derive(Debug, Clone, PartialEq)]
pub enum PageNode {
    /// Element generated by the host page itself
    Host(String),
    Overlay(OverlayElement),
}

#[derive(Debug, Default)]
struct PageTree {
    path: String,
    parents: HashMap<String, Vec<PageNode>>,
}

/// In-memory host page
///
/// Simulates a page that renders its layout on its own schedule and may
/// re-render it, dropping foreign insertions. Counts anchor queries so
/// polling can be observed.
#[derive(Debug, Default)]
pub struct VirtualPage {
    tree: Mutex<PageTree>,
    anchor_queries: AtomicUsize,
}

impl VirtualPage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            tree: Mutex::new(PageTree {
                path: path.into(),
                parents: HashMap::new(),
            }),
            anchor_queries: AtomicUsize::new(0),
        }
    }

    fn tree(&self) -> MutexGuard<'_, PageTree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates a navigation within the single-page host
    pub fn navigate(&self, path: impl Into<String>) {
        self.tree().path = path.into();
    }

    /// Renders (or re-renders) `selector` with `children` host elements
    ///
    /// Overlays previously spliced into this parent are lost, as they are
    /// when the host framework rebuilds a subtree.
    pub fn render(&self, selector: &str, children: usize) {
        let nodes = (0..children)
            .map(|i| PageNode::Host(format!("{}#{}", selector, i)))
            .collect();
        self.tree().parents.insert(selector.to_string(), nodes);
    }

    /// Detaches `selector` from the page
    pub fn remove(&self, selector: &str) {
        self.tree().parents.remove(selector);
    }

    /// Overlays currently attached, in no particular parent order
    pub fn overlays(&self) -> Vec<OverlayElement> {
        self.tree()
            .parents
            .values()
            .flatten()
            .filter_map(|node| match node {
                PageNode::Overlay(overlay) => Some(overlay.clone()),
                PageNode::Host(_) => None,
            })
            .collect()
    }

    /// Children of `selector`, if rendered
    pub fn children(&self, selector: &str) -> Option<Vec<PageNode>> {
        self.tree().parents.get(selector).cloned()
    }

    pub fn anchor_queries(&self) -> usize {
        self.anchor_queries.load(Ordering::SeqCst)
    }
}

impl HostPage for VirtualPage {
    fn path(&self) -> String {
        self.tree().path.clone()
    }

    fn query_anchor(&self, anchor: &AnchorDescriptor) -> Option<ParentHandle> {
        self.anchor_queries.fetch_add(1, Ordering::SeqCst);

        let tree = self.tree();
        let children = tree.parents.get(&anchor.selector)?;
        let hosts = children
            .iter()
            .filter(|node| matches!(node, PageNode::Host(_)))
            .count();

        (hosts > anchor.child_index).then(|| ParentHandle(anchor.selector.clone()))
    }

    fn insert_overlay(
        &self,
        parent: &ParentHandle,
        index: usize,
        overlay: OverlayElement,
    ) -> AppResult<()> {
        let mut tree = self.tree();
        let children = tree.parents.get_mut(&parent.0).ok_or_else(|| {
            AppError::Internal(format!("Parent {} is no longer attached", parent.0))
        })?;

        let position = index.min(children.len());
        children.insert(position, PageNode::Overlay(overlay));
        Ok(())
    }

    fn remove_overlays(&self, marker: &str) -> usize {
        let mut tree = self.tree();
        let mut removed = 0;

        for children in tree.parents.values_mut() {
            let before = children.len();
            children.retain(|node| !matches!(node, PageNode::Overlay(o) if o.marker == marker));
            removed += before - children.len();
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(marker: &str) -> OverlayElement {
        OverlayElement {
            marker: marker.to_string(),
            ..OverlayElement::default()
        }
    }

    #[test]
    fn test_anchor_requires_child_index() {
        let page = VirtualPage::new("/");
        let anchor = AnchorDescriptor::new("#grid", 1);

        assert_eq!(page.query_anchor(&anchor), None);
        page.render("#grid", 1);
        assert_eq!(page.query_anchor(&anchor), None);
        page.render("#grid", 2);
        assert_eq!(page.query_anchor(&anchor), Some(ParentHandle("#grid".to_string())));
        assert_eq!(page.anchor_queries(), 3);
    }

    #[test]
    fn test_insert_before_child() {
        let page = VirtualPage::new("/");
        page.render("#grid", 3);

        let parent = ParentHandle("#grid".to_string());
        page.insert_overlay(&parent, 1, overlay("ts")).unwrap();

        let children = page.children("#grid").unwrap();
        assert!(matches!(children[1], PageNode::Overlay(_)));
        assert_eq!(children.len(), 4);
    }

    #[test]
    fn test_remove_overlays_only_touches_marker() {
        let page = VirtualPage::new("/");
        page.render("#grid", 2);
        let parent = ParentHandle("#grid".to_string());
        page.insert_overlay(&parent, 0, overlay("ts")).unwrap();
        page.insert_overlay(&parent, 0, overlay("ts")).unwrap();
        page.insert_overlay(&parent, 0, overlay("other")).unwrap();

        assert_eq!(page.remove_overlays("ts"), 2);
        assert_eq!(page.overlays().len(), 1);
    }

    #[test]
    fn test_rerender_drops_overlays() {
        let page = VirtualPage::new("/");
        page.render("#grid", 2);
        page.insert_overlay(&ParentHandle("#grid".to_string()), 1, overlay("ts"))
            .unwrap();

        page.render("#grid", 2);
        assert!(page.overlays().is_empty());
    }

    #[test]
    fn test_insert_into_detached_parent_fails() {
        let page = VirtualPage::new("/");
        let result = page.insert_overlay(&ParentHandle("#gone".to_string()), 0, overlay("ts"));
        assert!(result.is_err());
    }
}
