//! Replicated Document built on Loro.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! ├── "items": LoroMap<ItemId, LoroMap>          (item records)
//! ├── "item_order": LoroList<String>              (z-order, last is topmost)
//! ├── "connections": LoroMap<ConnectionId, LoroMap>
//! ├── "connection_order": LoroList<String>
//! └── "meta": LoroMap { "board_kind": String }
//! ```
//!
//! Every record field is its own map entry, so concurrent writers merge per
//! field (last writer wins) rather than per record.

mod convert;
mod schema;

pub use convert::{connection_from_loro, connection_to_loro, item_from_loro, item_to_loro};
pub use schema::{
    BOARD_KIND_KEY, BoardDocument, CONNECTION_ORDER_KEY, CONNECTIONS_KEY, ChangeOrigin,
    ITEM_ORDER_KEY, ITEMS_KEY, ListenerId, META_KEY, SEED_ORIGIN, Transaction,
};

// Re-export Loro types needed by transport code
pub use loro::{ExportMode, VersionVector};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, NewItem};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn actor(x: f64) -> NewItem {
        NewItem::new(ItemKind::Actor, x, 0.0, 100.0, 50.0).with_label("Customer")
    }

    #[test]
    fn test_document_creation() {
        let doc = BoardDocument::new();
        assert!(doc.projection().is_empty());
        assert!(!doc.history().can_undo());
    }

    #[test]
    fn test_transaction_commits_once() {
        let mut doc = BoardDocument::new();
        let revisions = Rc::new(RefCell::new(Vec::new()));
        let seen = revisions.clone();
        doc.on_change(move |projection, origin| {
            seen.borrow_mut().push((projection.items().len(), origin));
        });

        doc.add_item(actor(0.0)).expect("Failed to add item");
        doc.add_item(actor(200.0)).expect("Failed to add item");

        let seen = revisions.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (2, ChangeOrigin::Local));
    }

    #[test]
    fn test_empty_transaction_does_not_notify() {
        let mut doc = BoardDocument::new();
        let count = Rc::new(RefCell::new(0));
        let seen = count.clone();
        doc.on_change(move |_, _| *seen.borrow_mut() += 1);

        doc.apply_transaction(|_txn| Ok(())).expect("Failed to run transaction");
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_remove_listener() {
        let mut doc = BoardDocument::new();
        let count = Rc::new(RefCell::new(0));
        let seen = count.clone();
        let id = doc.on_change(move |_, _| *seen.borrow_mut() += 1);
        assert!(doc.remove_listener(id));

        doc.add_item(actor(0.0)).expect("Failed to add item");
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let mut doc = BoardDocument::new();
        let id = doc.add_item(actor(0.0)).expect("Failed to add item");

        doc.apply_transaction(|txn| {
            let mut item = txn.item(&id).cloned().expect("item");
            item.x = 40.0;
            txn.update_item(&item)?;
            assert!((txn.item(&id).expect("item").x - 40.0).abs() < 0.001);
            txn.remove_item(&id)?;
            assert!(txn.item(&id).is_none());
            assert!(txn.item_ids().is_empty());
            Ok(())
        })
        .expect("Failed to run transaction");

        assert!(doc.projection().is_empty());
    }

    #[test]
    fn test_export_import() {
        let mut doc = BoardDocument::new();
        doc.add_item(actor(10.0)).expect("Failed to add item");

        let bytes = doc.export_snapshot().expect("Failed to export");
        let doc2 = BoardDocument::from_snapshot(&bytes, &Default::default()).expect("Failed to import");

        assert_eq!(doc2.projection().items().len(), 1);
        assert!(!doc2.history().can_undo());
    }

    #[test]
    fn test_import_notifies_remote() {
        let mut source = BoardDocument::new();
        source.add_item(actor(10.0)).expect("Failed to add item");
        let bytes = source.export_snapshot().expect("Failed to export");

        let mut target = BoardDocument::new();
        let origins = Rc::new(RefCell::new(Vec::new()));
        let seen = origins.clone();
        target.on_change(move |_, origin| seen.borrow_mut().push(origin));

        target.import(&bytes).expect("Failed to import");
        // Importing the same bytes again changes nothing
        target.import(&bytes).expect("Failed to import");

        assert_eq!(*origins.borrow(), vec![ChangeOrigin::Remote]);
        assert_eq!(target.projection().items().len(), 1);
    }

    #[test]
    fn test_concurrent_updates_merge_per_field() {
        let mut a = BoardDocument::new();
        let id = a.add_item(actor(0.0)).expect("Failed to add item");
        let mut b = BoardDocument::from_snapshot(&a.export_snapshot().expect("export"), &Default::default())
            .expect("Failed to import");

        let mut on_a = a.projection().item(&id).cloned().expect("item");
        on_a.x = 10.0;
        a.update_item(&on_a).expect("Failed to update");

        let mut on_b = b.projection().item(&id).cloned().expect("item");
        on_b.x = 20.0;
        on_b.y = 99.0;
        b.update_item(&on_b).expect("Failed to update");

        let from_a = a.export_snapshot().expect("export");
        let from_b = b.export_snapshot().expect("export");
        a.import(&from_b).expect("Failed to import");
        b.import(&from_a).expect("Failed to import");

        assert_eq!(a.projection().items().len(), 1);
        assert_eq!(a.projection().items(), b.projection().items());
        let merged = a.projection().item(&id).expect("item");
        assert!(merged.x == 10.0 || merged.x == 20.0);
        // y was only written by one side
        assert!((merged.y - 99.0).abs() < 0.001);
    }
}
