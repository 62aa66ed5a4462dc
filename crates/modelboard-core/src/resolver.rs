//! Containment and attachment resolution.
//!
//! Derives `parent` links from geometry. Containers enclose items whose center
//! lies inside them; sticky kinds attach to a nearby host of an allowed kind.
//! Host attachment wins over containment. Containers nest one level only, so
//! a container never receives a container parent.
//!
//! All functions are pure: they read a slice of items (usually
//! `projection.items()`) and return the changed records for the caller to
//! commit through the Mutation API.

use std::collections::{HashMap, HashSet};

use kurbo::Rect;

use crate::config::EngineConfig;
use crate::model::{Item, ItemId, NewItem};

/// Check if two rectangles overlap with a positive area.
fn overlaps(a: Rect, b: Rect) -> bool {
    a.intersect(b).area() > 0.0
}

/// The topmost container enclosing the center of `item`.
pub fn container_for<'a>(items: &'a [Item], item: &Item) -> Option<&'a Item> {
    if item.tag().is_container() {
        return None;
    }
    let center = item.center();
    items
        .iter()
        .rev()
        .filter(|candidate| candidate.id != item.id && candidate.tag().is_container())
        .find(|candidate| candidate.bounds().contains(center))
}

/// The nearest host `item` sticks to, if it is a sticky kind.
///
/// A host qualifies when its box grown by `snap_threshold` on every side
/// overlaps the item box. Ties keep the topmost host.
pub fn host_for<'a>(items: &'a [Item], item: &Item, config: &EngineConfig) -> Option<&'a Item> {
    let hosts = item.tag().attachment_hosts();
    if hosts.is_empty() {
        return None;
    }
    let bounds = item.bounds();
    let center = item.center();
    let threshold = config.snap_threshold;
    items
        .iter()
        .rev()
        .filter(|candidate| candidate.id != item.id && hosts.contains(&candidate.tag()))
        .filter(|candidate| overlaps(candidate.bounds().inflate(threshold, threshold), bounds))
        .min_by(|a, b| {
            let da = (a.center() - center).hypot2();
            let db = (b.center() - center).hypot2();
            da.total_cmp(&db)
        })
}

/// The parent `item` should have given the current geometry.
pub fn parent_for(items: &[Item], item: &Item, config: &EngineConfig) -> Option<ItemId> {
    host_for(items, item, config)
        .or_else(|| container_for(items, item))
        .map(|parent| parent.id.clone())
}

/// Set the `parent` of an item that is about to be created.
pub fn assign_parent(items: &[Item], new_item: &mut NewItem, config: &EngineConfig) {
    let draft = new_item.clone().into_item(String::new());
    new_item.parent = parent_for(items, &draft, config);
}

/// Recompute `parent` for every moved non-container, then rebuild `children`
/// of every old and new parent from the full set of parent links.
///
/// Sticky items attached to a moved host are re-resolved too, since the host
/// may have left them behind. Returns only items that changed.
pub fn resolve_drag_end(items: &[Item], moved_ids: &[ItemId], config: &EngineConfig) -> Vec<Item> {
    let moved: HashSet<&str> = moved_ids.iter().map(String::as_str).collect();
    let targets: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.tag().is_container())
        .filter(|(_, item)| {
            moved.contains(item.id.as_str())
                || (item.tag().is_sticky() && item.parent.as_deref().is_some_and(|p| moved.contains(p)))
        })
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }

    let mut view: Vec<Item> = items.to_vec();
    let mut affected: HashSet<ItemId> = HashSet::new();
    for &i in &targets {
        let next = parent_for(items, &items[i], config);
        affected.extend(items[i].parent.clone());
        affected.extend(next.clone());
        view[i].parent = next;
    }
    refresh_children(&mut view, &affected);
    changed(items, view)
}

/// Copies of the container's children moved by (dx, dy).
pub fn cascade_container_move(items: &[Item], container_id: &str, dx: f64, dy: f64) -> Vec<Item> {
    items
        .iter()
        .filter(|item| item.parent.as_deref() == Some(container_id))
        .map(|item| item.translated(dx, dy))
        .collect()
}

/// Items whose cached `children` disagree with the `parent` links.
pub fn rebuild_children(items: &[Item]) -> Vec<Item> {
    let mut view = items.to_vec();
    let all: HashSet<ItemId> = items.iter().map(|item| item.id.clone()).collect();
    refresh_children(&mut view, &all);
    changed(items, view)
}

/// Rewrite `children` of every item in `parents` from the parent links.
fn refresh_children(view: &mut [Item], parents: &HashSet<ItemId>) {
    let mut children: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
    for item in view.iter() {
        if let Some(parent) = item.parent.as_ref().filter(|p| parents.contains(*p)) {
            children.entry(parent.clone()).or_default().push(item.id.clone());
        }
    }
    for item in view.iter_mut().filter(|item| parents.contains(&item.id)) {
        item.children = children.remove(&item.id).unwrap_or_default();
    }
}

fn changed(before: &[Item], after: Vec<Item>) -> Vec<Item> {
    before
        .iter()
        .zip(after)
        .filter(|(old, new)| *old != new)
        .map(|(_, new)| new)
        .collect()
}
