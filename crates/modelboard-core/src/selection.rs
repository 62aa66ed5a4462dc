//! Selection, group drag and transform gestures.
//!
//! The controller keeps gestures local: pointer moves only produce visual
//! positions in a [`Frame`], and the document is written once when a gesture
//! ends. Cancelling a gesture never touches the document.

use std::collections::{HashMap, HashSet};

use kurbo::{Point, Rect, Vec2};

use crate::config::EngineConfig;
use crate::crdt::BoardDocument;
use crate::error::{BoardError, BoardResult};
use crate::model::{ConnectionKind, Item, ItemId, NewConnection};
use crate::projection::Projection;
use crate::resolver;

/// Modifier keys held during a pointer event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Shift/Cmd: toggle membership instead of replacing the selection.
    pub toggle: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { toggle: false };
    pub const TOGGLE: Modifiers = Modifiers { toggle: true };
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Idle,
    SingleSelected,
    MultiSelected,
    /// Armed to create a connection; waits for two item clicks.
    Connecting { kind: ConnectionKind, first: Option<ItemId> },
    RubberBand { origin: Point, current: Point, additive: bool },
}

/// Pointer gesture in progress beside the selection state.
#[derive(Debug, Clone, PartialEq)]
enum Gesture {
    None,
    /// Pressed on an item; becomes a drag on the first move.
    Pressed { item: ItemId, origin: Point, toggled: bool },
    Dragging {
        origin: Point,
        current: Point,
        /// Start positions of everything that moves, selection first.
        start: Vec<(ItemId, Point)>,
    },
    Transforming { id: ItemId },
}

/// What the render surface should show after an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub selection: Vec<ItemId>,
    /// Live top-left positions of items being dragged.
    pub positions: HashMap<ItemId, Point>,
    /// Rubber band rectangle, if one is being drawn.
    pub band: Option<Rect>,
}

/// Final box of a resize/rotate gesture as reported by the render surface.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformInput {
    pub id: ItemId,
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
}

/// Selection and gesture state machine for one editor.
pub struct SelectionController {
    config: EngineConfig,
    state: ControllerState,
    selection: Vec<ItemId>,
    gesture: Gesture,
}

impl SelectionController {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: ControllerState::Idle,
            selection: Vec::new(),
            gesture: Gesture::None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn selection(&self) -> &[ItemId] {
        &self.selection
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.iter().any(|s| s == id)
    }

    /// Whether a drag, rubber band or transform is in progress.
    pub fn is_gesture_active(&self) -> bool {
        !matches!(self.gesture, Gesture::None) || matches!(self.state, ControllerState::RubberBand { .. })
    }

    /// Topmost item under `point`, within the hit tolerance.
    fn hit<'a>(&self, projection: &'a Projection, point: Point) -> Option<&'a Item> {
        let tolerance = self.config.hit_tolerance;
        projection
            .items()
            .iter()
            .rev()
            .find(|item| item.bounds().inflate(tolerance, tolerance).contains(point))
    }

    fn settle(&mut self) {
        self.state = match self.selection.len() {
            0 => ControllerState::Idle,
            1 => ControllerState::SingleSelected,
            _ => ControllerState::MultiSelected,
        };
    }

    fn set_selection(&mut self, ids: Vec<ItemId>) {
        self.selection = ids;
        self.settle();
    }

    fn toggle(&mut self, id: &str) {
        if let Some(pos) = self.selection.iter().position(|s| s == id) {
            self.selection.remove(pos);
        } else {
            self.selection.push(id.to_string());
        }
        self.settle();
    }

    /// Current visual state.
    pub fn frame(&self) -> Frame {
        let mut frame = Frame {
            selection: self.selection.clone(),
            ..Default::default()
        };
        if let Gesture::Dragging { origin, current, start } = &self.gesture {
            let delta = *current - *origin;
            frame.positions = start.iter().map(|(id, p)| (id.clone(), *p + delta)).collect();
        }
        if let ControllerState::RubberBand { origin, current, .. } = &self.state {
            frame.band = Some(Rect::from_points(*origin, *current));
        }
        frame
    }

    // --- Pointer events ---

    pub fn pointer_down(&mut self, doc: &mut BoardDocument, point: Point, modifiers: Modifiers) -> BoardResult<Frame> {
        if let ControllerState::Connecting { kind, first } = self.state.clone() {
            let hit = self.hit(doc.projection(), point).map(|item| item.id.clone());
            if let Some(target) = hit {
                self.connect_click(doc, kind, first, target)?;
            }
            return Ok(self.frame());
        }

        self.gesture = Gesture::None;
        match self.hit(doc.projection(), point).map(|item| item.id.clone()) {
            Some(id) => {
                if modifiers.toggle {
                    self.toggle(&id);
                } else if !self.is_selected(&id) {
                    self.set_selection(vec![id.clone()]);
                }
                if self.is_selected(&id) {
                    self.gesture = Gesture::Pressed {
                        item: id,
                        origin: point,
                        toggled: modifiers.toggle,
                    };
                }
            }
            None => {
                self.state = ControllerState::RubberBand {
                    origin: point,
                    current: point,
                    additive: modifiers.toggle,
                };
            }
        }
        Ok(self.frame())
    }

    fn connect_click(
        &mut self,
        doc: &mut BoardDocument,
        kind: ConnectionKind,
        first: Option<ItemId>,
        target: ItemId,
    ) -> BoardResult<()> {
        let connectable = doc.projection().item(&target).is_some_and(|item| item.tag().is_connectable());
        let Some(first) = first else {
            if connectable {
                self.state = ControllerState::Connecting {
                    kind,
                    first: Some(target),
                };
            } else {
                self.settle();
            }
            return Ok(());
        };
        self.settle();
        if first == target || !connectable {
            return Ok(());
        }
        match doc.add_connection(NewConnection::new(first, target, kind)) {
            Ok(id) => {
                log::debug!("Created {:?} connection {}", kind, id);
                Ok(())
            }
            Err(e @ (BoardError::IllegalEndpoint { .. } | BoardError::MissingEndpoint { .. })) => {
                log::debug!("Connection rejected: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn pointer_move(&mut self, doc: &BoardDocument, point: Point) -> Frame {
        if let ControllerState::RubberBand { current, .. } = &mut self.state {
            *current = point;
            return self.frame();
        }
        if let Gesture::Pressed { origin, .. } = self.gesture {
            self.gesture = Gesture::Dragging {
                origin,
                current: point,
                start: self.drag_start_positions(doc.projection()),
            };
        } else if let Gesture::Dragging { current, .. } = &mut self.gesture {
            *current = point;
        }
        self.frame()
    }

    /// Start positions of the selection and of the children of selected
    /// containers, each item once.
    fn drag_start_positions(&self, projection: &Projection) -> Vec<(ItemId, Point)> {
        let mut seen = HashSet::new();
        let mut start = Vec::new();
        for id in &self.selection {
            let Some(item) = projection.item(id) else {
                continue;
            };
            if seen.insert(item.id.clone()) {
                start.push((item.id.clone(), item.position()));
            }
            if item.tag().is_container() {
                for child in projection.children_of(&item.id) {
                    if seen.insert(child.id.clone()) {
                        start.push((child.id.clone(), child.position()));
                    }
                }
            }
        }
        start
    }

    pub fn pointer_up(&mut self, doc: &mut BoardDocument, point: Point) -> BoardResult<Frame> {
        if let ControllerState::RubberBand { origin, additive, .. } = self.state.clone() {
            let band = Rect::from_points(origin, point);
            let hits = doc.projection().items_in_rect(band);
            if additive {
                let mut selection = self.selection.clone();
                for id in hits {
                    if !selection.contains(&id) {
                        selection.push(id);
                    }
                }
                self.set_selection(selection);
            } else {
                self.set_selection(hits);
            }
            return Ok(self.frame());
        }

        match std::mem::replace(&mut self.gesture, Gesture::None) {
            Gesture::Pressed { item, toggled, .. } => {
                if !toggled && self.selection.len() > 1 {
                    self.set_selection(vec![item]);
                }
            }
            Gesture::Dragging { origin, start, .. } => {
                let delta = point - origin;
                if delta.hypot() > f64::EPSILON {
                    self.commit_drag(doc, &start, delta)?;
                }
            }
            other => self.gesture = other,
        }
        Ok(self.frame())
    }

    fn commit_drag(&self, doc: &mut BoardDocument, start: &[(ItemId, Point)], delta: Vec2) -> BoardResult<()> {
        doc.history_mut().begin_group()?;
        let result = self.write_drag(doc, start, delta);
        doc.history_mut().end_group();
        result
    }

    fn write_drag(&self, doc: &mut BoardDocument, start: &[(ItemId, Point)], delta: Vec2) -> BoardResult<()> {
        let starts: HashMap<&str, Point> = start.iter().map(|(id, p)| (id.as_str(), *p)).collect();
        let mut direct: Vec<ItemId> = self
            .selection
            .iter()
            .filter(|id| starts.contains_key(id.as_str()))
            .cloned()
            .collect();
        let containers: Vec<ItemId> = direct
            .iter()
            .filter(|id| doc.projection().item(id).is_some_and(|i| i.tag().is_container()))
            .cloned()
            .collect();
        // A selected child of a selected container moves with the container.
        direct.retain(|id| {
            containers.contains(id)
                || !doc
                    .projection()
                    .item(id)
                    .and_then(|i| i.parent.as_ref())
                    .is_some_and(|p| containers.contains(p))
        });

        let mut cascaded: Vec<ItemId> = Vec::new();
        for id in &direct {
            let Some(mut item) = doc.projection().item(id).cloned() else {
                continue;
            };
            let target = starts[id.as_str()] + delta;
            let (dx, dy) = (target.x - item.x, target.y - item.y);
            item.x = target.x;
            item.y = target.y;
            if item.tag().is_container() {
                let children = resolver::cascade_container_move(doc.projection().items(), id, dx, dy);
                doc.update_item(&item)?;
                for child in &children {
                    doc.update_item(child)?;
                }
                cascaded.extend(children.into_iter().map(|child| child.id));
            } else {
                doc.update_item(&item)?;
            }
        }

        // Cascaded children count as moved so stickies on them are re-resolved.
        let mut to_resolve: Vec<ItemId> = direct.iter().filter(|id| !containers.contains(id)).cloned().collect();
        to_resolve.extend(cascaded);
        to_resolve.extend(newly_covered(doc.projection(), &containers));
        for item in resolver::resolve_drag_end(doc.projection().items(), &to_resolve, &self.config) {
            doc.update_item(&item)?;
        }
        Ok(())
    }

    /// Cancel connecting mode, else any gesture and the selection.
    pub fn escape(&mut self) -> Frame {
        if matches!(self.state, ControllerState::Connecting { .. }) {
            self.settle();
            return self.frame();
        }
        self.gesture = Gesture::None;
        self.set_selection(Vec::new());
        self.frame()
    }

    pub fn begin_connecting(&mut self, kind: ConnectionKind) {
        self.gesture = Gesture::None;
        self.state = ControllerState::Connecting { kind, first: None };
    }

    /// Start resizing/rotating an item. Returns false if it does not exist.
    pub fn begin_transform(&mut self, doc: &BoardDocument, id: &str) -> bool {
        if !doc.projection().contains_item(id) {
            return false;
        }
        if !self.is_selected(id) {
            self.set_selection(vec![id.to_string()]);
        }
        self.gesture = Gesture::Transforming { id: id.to_string() };
        true
    }

    /// Write the result of a resize/rotate gesture.
    ///
    /// Scale is folded into width and height of the item as it is in the
    /// document now, clamped to the minimum size. Returns false if the item
    /// is gone.
    pub fn commit_transform(&mut self, doc: &mut BoardDocument, input: TransformInput) -> BoardResult<bool> {
        if matches!(&self.gesture, Gesture::Transforming { id } if *id == input.id) {
            self.gesture = Gesture::None;
        }
        let Some(mut item) = doc.projection().item(&input.id).cloned() else {
            return Ok(false);
        };
        let min = self.config.min_item_size;
        item.x = input.x;
        item.y = input.y;
        item.width = (item.width * input.scale_x.abs()).max(min);
        item.height = (item.height * input.scale_y.abs()).max(min);
        item.rotation = input.rotation;

        doc.history_mut().begin_group()?;
        let result = self.write_transform(doc, &item);
        doc.history_mut().end_group();
        result
    }

    fn write_transform(&self, doc: &mut BoardDocument, item: &Item) -> BoardResult<bool> {
        if !doc.update_item(item)? {
            return Ok(false);
        }
        let to_resolve = if item.tag().is_container() {
            let mut ids: Vec<ItemId> = doc.projection().children_of(&item.id).into_iter().map(|c| c.id.clone()).collect();
            ids.extend(newly_covered(doc.projection(), std::slice::from_ref(&item.id)));
            ids
        } else {
            vec![item.id.clone()]
        };
        for changed in resolver::resolve_drag_end(doc.projection().items(), &to_resolve, &self.config) {
            doc.update_item(&changed)?;
        }
        Ok(true)
    }

    /// Drop ids that no longer exist, e.g. after a remote delete.
    pub fn prune(&mut self, projection: &Projection) {
        let before = self.selection.len();
        self.selection.retain(|id| projection.contains_item(id));
        match &mut self.state {
            ControllerState::Connecting { first, .. } => {
                if first.as_deref().is_some_and(|id| !projection.contains_item(id)) {
                    *first = None;
                }
            }
            ControllerState::RubberBand { .. } => {}
            _ => {
                if self.selection.len() != before {
                    self.settle();
                }
            }
        }
        let stale = match &mut self.gesture {
            Gesture::Pressed { item, .. } | Gesture::Transforming { id: item } => !projection.contains_item(item),
            Gesture::Dragging { start, .. } => {
                start.retain(|(id, _)| projection.contains_item(id));
                false
            }
            Gesture::None => false,
        };
        if stale {
            self.gesture = Gesture::None;
        }
    }
}

/// Non-container items whose center now lies in one of `containers` but
/// that are not its children yet.
fn newly_covered(projection: &Projection, containers: &[ItemId]) -> Vec<ItemId> {
    let rects: Vec<(&str, Rect)> = containers
        .iter()
        .filter_map(|id| projection.item(id).map(|c| (c.id.as_str(), c.bounds())))
        .collect();
    projection
        .items()
        .iter()
        .filter(|item| !item.tag().is_container())
        .filter(|item| {
            rects
                .iter()
                .any(|(id, rect)| rect.contains(item.center()) && item.parent.as_deref() != Some(*id))
        })
        .map(|item| item.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, MessageLinks, NewItem};

    fn setup() -> (BoardDocument, SelectionController) {
        (BoardDocument::new(), SelectionController::new(EngineConfig::default()))
    }

    fn add(doc: &mut BoardDocument, kind: ItemKind, x: f64, y: f64, w: f64, h: f64) -> ItemId {
        doc.add_item(NewItem::new(kind, x, y, w, h)).expect("Failed to add item")
    }

    fn command(doc: &mut BoardDocument, x: f64, y: f64) -> ItemId {
        add(doc, ItemKind::MessageTrigger(MessageLinks::default()), x, y, 100.0, 50.0)
    }

    fn pos(doc: &BoardDocument, id: &str) -> Point {
        doc.projection().item(id).map(|i| i.position()).expect("item")
    }

    #[test]
    fn test_click_selects_and_replaces() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let b = command(&mut doc, 300.0, 0.0);

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(10.0, 10.0)).expect("up");
        assert_eq!(ctl.selection(), &[a.clone()]);
        assert_eq!(ctl.state(), &ControllerState::SingleSelected);

        ctl.pointer_down(&mut doc, Point::new(310.0, 10.0), Modifiers::NONE).expect("down");
        assert_eq!(ctl.selection(), &[b]);
    }

    #[test]
    fn test_modifier_click_toggles() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let b = command(&mut doc, 300.0, 0.0);

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(10.0, 10.0)).expect("up");
        ctl.pointer_down(&mut doc, Point::new(310.0, 10.0), Modifiers::TOGGLE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(310.0, 10.0)).expect("up");
        assert_eq!(ctl.selection(), &[a.clone(), b]);
        assert_eq!(ctl.state(), &ControllerState::MultiSelected);

        ctl.pointer_down(&mut doc, Point::new(310.0, 10.0), Modifiers::TOGGLE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(310.0, 10.0)).expect("up");
        assert_eq!(ctl.selection(), &[a]);
    }

    #[test]
    fn test_click_in_multi_selection_narrows_on_release() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        command(&mut doc, 300.0, 0.0);
        ctl.pointer_down(&mut doc, Point::new(-20.0, -20.0), Modifiers::NONE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(500.0, 100.0)).expect("up");
        assert_eq!(ctl.selection().len(), 2);

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        assert_eq!(ctl.selection().len(), 2);
        ctl.pointer_up(&mut doc, Point::new(10.0, 10.0)).expect("up");
        assert_eq!(ctl.selection(), &[a]);
    }

    #[test]
    fn test_rubber_band_selects_intersecting() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let b = command(&mut doc, 300.0, 0.0);
        let c = command(&mut doc, 600.0, 0.0);

        ctl.pointer_down(&mut doc, Point::new(50.0, -50.0), Modifiers::NONE).expect("down");
        let frame = ctl.pointer_move(&doc, Point::new(350.0, 20.0));
        assert!(frame.band.is_some());
        ctl.pointer_up(&mut doc, Point::new(350.0, 20.0)).expect("up");
        assert_eq!(ctl.selection(), &[a.clone(), b.clone()]);

        ctl.pointer_down(&mut doc, Point::new(650.0, -50.0), Modifiers::TOGGLE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(660.0, 20.0)).expect("up");
        assert_eq!(ctl.selection(), &[a, b, c]);

        // A click on empty canvas clears.
        ctl.pointer_down(&mut doc, Point::new(1000.0, 1000.0), Modifiers::NONE).expect("down");
        let frame = ctl.pointer_up(&mut doc, Point::new(1000.0, 1000.0)).expect("up");
        assert!(frame.selection.is_empty());
        assert_eq!(ctl.state(), &ControllerState::Idle);
    }

    #[test]
    fn test_drag_is_visual_until_release() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let revision = doc.projection().revision();

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        let frame = ctl.pointer_move(&doc, Point::new(60.0, 30.0));
        assert_eq!(frame.positions.get(&a), Some(&Point::new(50.0, 20.0)));
        assert_eq!(doc.projection().revision(), revision);

        ctl.pointer_up(&mut doc, Point::new(110.0, 10.0)).expect("up");
        assert_eq!(pos(&doc, &a), Point::new(100.0, 0.0));
    }

    #[test]
    fn test_zero_delta_drag_commits_nothing() {
        let (mut doc, mut ctl) = setup();
        command(&mut doc, 0.0, 0.0);
        let revision = doc.projection().revision();

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_move(&doc, Point::new(40.0, 40.0));
        ctl.pointer_up(&mut doc, Point::new(10.0, 10.0)).expect("up");
        assert_eq!(doc.projection().revision(), revision);
    }

    #[test]
    fn test_escape_cancels_drag() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let revision = doc.projection().revision();

        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_move(&doc, Point::new(200.0, 200.0));
        let frame = ctl.escape();
        assert!(frame.positions.is_empty());
        ctl.pointer_up(&mut doc, Point::new(200.0, 200.0)).expect("up");
        assert_eq!(doc.projection().revision(), revision);
        assert_eq!(pos(&doc, &a), Point::new(0.0, 0.0));
    }

    #[test]
    fn test_container_drag_cascades_and_undoes_once() {
        let (mut doc, mut ctl) = setup();
        let x = add(&mut doc, ItemKind::ContextContainer, 0.0, 0.0, 400.0, 300.0);
        let mut new_y = NewItem::new(ItemKind::MessageTrigger(MessageLinks::default()), 50.0, 50.0, 100.0, 50.0);
        new_y.parent = Some(x.clone());
        let y = doc.add_item(new_y).expect("Failed to add child");

        // Grab the container away from its child.
        ctl.pointer_down(&mut doc, Point::new(300.0, 250.0), Modifiers::NONE).expect("down");
        assert_eq!(ctl.selection(), &[x.clone()]);
        let frame = ctl.pointer_move(&doc, Point::new(350.0, 300.0));
        assert_eq!(frame.positions.get(&y), Some(&Point::new(100.0, 100.0)));
        ctl.pointer_up(&mut doc, Point::new(400.0, 350.0)).expect("up");

        assert_eq!(pos(&doc, &x), Point::new(100.0, 100.0));
        assert_eq!(pos(&doc, &y), Point::new(150.0, 150.0));
        assert_eq!(doc.projection().item(&y).and_then(|i| i.parent.clone()), Some(x.clone()));

        assert!(doc.undo().expect("undo"));
        assert_eq!(pos(&doc, &x), Point::new(0.0, 0.0));
        assert_eq!(pos(&doc, &y), Point::new(50.0, 50.0));
    }

    #[test]
    fn test_drag_into_container_reparents() {
        let (mut doc, mut ctl) = setup();
        let x = add(&mut doc, ItemKind::ContextContainer, 0.0, 0.0, 400.0, 300.0);
        let y = command(&mut doc, 600.0, 50.0);

        ctl.pointer_down(&mut doc, Point::new(610.0, 60.0), Modifiers::NONE).expect("down");
        ctl.pointer_move(&doc, Point::new(300.0, 60.0));
        ctl.pointer_up(&mut doc, Point::new(60.0, 60.0)).expect("up");

        assert_eq!(doc.projection().item(&y).and_then(|i| i.parent.clone()), Some(x.clone()));
        assert_eq!(doc.projection().item(&x).map(|i| i.children.clone()), Some(vec![y]));
    }

    #[test]
    fn test_container_drag_releases_stickies_of_children() {
        let (mut doc, mut ctl) = setup();
        let x = add(&mut doc, ItemKind::ContextContainer, 0.0, 0.0, 400.0, 300.0);
        let mut new_cmd = NewItem::new(ItemKind::MessageTrigger(MessageLinks::default()), 50.0, 50.0, 100.0, 50.0);
        new_cmd.parent = Some(x.clone());
        let cmd = doc.add_item(new_cmd).expect("Failed to add command");
        // Attached to the command but lying outside the container.
        let mut new_actor = NewItem::new(ItemKind::Actor, 155.0, 50.0, 50.0, 50.0);
        new_actor.parent = Some(cmd.clone());
        let actor = doc.add_item(new_actor).expect("Failed to add actor");

        ctl.pointer_down(&mut doc, Point::new(300.0, 250.0), Modifiers::NONE).expect("down");
        ctl.pointer_move(&doc, Point::new(800.0, 250.0));
        ctl.pointer_up(&mut doc, Point::new(1300.0, 250.0)).expect("up");

        assert_eq!(pos(&doc, &cmd), Point::new(1050.0, 50.0));
        assert_eq!(pos(&doc, &actor), Point::new(155.0, 50.0));
        let projection = doc.projection();
        assert_eq!(projection.item(&cmd).and_then(|i| i.parent.clone()), Some(x));
        assert!(projection.item(&actor).expect("actor").parent.is_none());
        assert!(projection.item(&cmd).expect("command").children.is_empty());
    }

    #[test]
    fn test_connecting_creates_connection() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        let b = command(&mut doc, 300.0, 0.0);

        ctl.begin_connecting(ConnectionKind::Association);
        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        assert!(matches!(ctl.state(), ControllerState::Connecting { first: Some(_), .. }));
        ctl.pointer_down(&mut doc, Point::new(310.0, 10.0), Modifiers::NONE).expect("down");

        let conns = doc.projection().connections();
        assert_eq!(conns.len(), 1);
        assert_eq!((conns[0].from.as_str(), conns[0].to.as_str()), (a.as_str(), b.as_str()));
        assert_eq!(conns[0].kind, ConnectionKind::Association);
        assert!(!matches!(ctl.state(), ControllerState::Connecting { .. }));
    }

    #[test]
    fn test_connecting_to_container_returns_to_idle() {
        let (mut doc, mut ctl) = setup();
        command(&mut doc, 0.0, 0.0);
        add(&mut doc, ItemKind::ContextContainer, 500.0, 0.0, 400.0, 300.0);
        let revision = doc.projection().revision();

        ctl.begin_connecting(ConnectionKind::Plain);
        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_down(&mut doc, Point::new(700.0, 150.0), Modifiers::NONE).expect("down");
        assert_eq!(ctl.state(), &ControllerState::Idle);
        assert_eq!(doc.projection().revision(), revision);
    }

    #[test]
    fn test_escape_priority() {
        let (mut doc, mut ctl) = setup();
        command(&mut doc, 0.0, 0.0);
        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        ctl.pointer_up(&mut doc, Point::new(10.0, 10.0)).expect("up");
        ctl.begin_connecting(ConnectionKind::Plain);

        ctl.escape();
        assert_eq!(ctl.state(), &ControllerState::SingleSelected);
        ctl.escape();
        assert!(ctl.selection().is_empty());
    }

    #[test]
    fn test_transform_clamps_and_resets_scale() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        assert!(ctl.begin_transform(&doc, &a));

        let input = TransformInput {
            id: a.clone(),
            x: 10.0,
            y: 20.0,
            scale_x: 2.0,
            scale_y: 0.0,
            rotation: 45.0,
        };
        assert!(ctl.commit_transform(&mut doc, input).expect("transform"));
        let item = doc.projection().item(&a).expect("item");
        assert!((item.width - 200.0).abs() < 0.001);
        assert!((item.height - 5.0).abs() < 0.001);
        assert!((item.rotation - 45.0).abs() < 0.001);
        assert!(!ctl.is_gesture_active());
    }

    #[test]
    fn test_transform_container_releases_children() {
        let (mut doc, mut ctl) = setup();
        let x = add(&mut doc, ItemKind::ContextContainer, 0.0, 0.0, 400.0, 300.0);
        let mut new_y = NewItem::new(ItemKind::MessageTrigger(MessageLinks::default()), 300.0, 50.0, 60.0, 40.0);
        new_y.parent = Some(x.clone());
        let y = doc.add_item(new_y).expect("Failed to add child");

        let input = TransformInput {
            id: x.clone(),
            x: 0.0,
            y: 0.0,
            scale_x: 0.5,
            scale_y: 1.0,
            rotation: 0.0,
        };
        assert!(ctl.commit_transform(&mut doc, input).expect("transform"));
        assert!(doc.projection().item(&y).expect("child").parent.is_none());
        assert!(doc.projection().item(&x).expect("container").children.is_empty());
    }

    #[test]
    fn test_prune_after_remote_delete() {
        let (mut doc, mut ctl) = setup();
        let a = command(&mut doc, 0.0, 0.0);
        ctl.pointer_down(&mut doc, Point::new(10.0, 10.0), Modifiers::NONE).expect("down");
        doc.delete_items_and_attached_connections(&[a]).expect("delete");

        ctl.prune(doc.projection());
        assert!(ctl.selection().is_empty());
        assert_eq!(ctl.state(), &ControllerState::Idle);
        assert!(!ctl.is_gesture_active());
    }
}
