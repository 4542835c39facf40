//! Id-keyed list reconciliation shared by every domain store.
//!
//! Each operation touches the backing list and the store's selected entity
//! together so the two never disagree about an id. Callers run these inside a
//! single `StoreCell::update` so observers see one consistent snapshot.

use serde::Serialize;
use serde_json::Value;

use crate::normalize;
use crate::types::{ActionItem, AiInsight, CalendarEvent, Contact, Conversation, Deal};

pub trait Entity {
    fn id(&self) -> &str;
}

macro_rules! entity_by_id_field {
    ($($ty:ty),* $(,)?) => {
        $(impl Entity for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

entity_by_id_field!(Contact, Deal, CalendarEvent, Conversation, ActionItem, AiInsight);

fn same_id<T: Entity>(selected: &Option<T>, id: &str) -> bool {
    selected.as_ref().map(|s| s.id() == id).unwrap_or(false)
}

/// Insert a new entity at the front. An entity already present (for example a
/// push event echoing our own create) is replaced in place instead.
pub fn upsert_front<T: Entity + Clone>(items: &mut Vec<T>, selected: &mut Option<T>, item: T) {
    if same_id(selected, item.id()) {
        *selected = Some(item.clone());
    }
    match items.iter().position(|existing| existing.id() == item.id()) {
        Some(index) => items[index] = item,
        None => items.insert(0, item),
    }
}

/// Replace the entity with the same id. Returns false if neither the list nor
/// the selection held it.
pub fn replace_by_id<T: Entity + Clone>(items: &mut [T], selected: &mut Option<T>, item: T) -> bool {
    let mut found = false;
    if same_id(selected, item.id()) {
        *selected = Some(item.clone());
        found = true;
    }
    if let Some(existing) = items.iter_mut().find(|existing| existing.id() == item.id()) {
        *existing = item;
        found = true;
    }
    found
}

/// Shallow-merge `patch` into the entity with `id` and renormalize it.
/// Fields the patch omits keep their current values. `fields` is the entity's
/// alias table (see [`normalize::merge_patch`]).
pub fn patch_by_id<T, N>(
    items: &mut [T],
    selected: &mut Option<T>,
    id: &str,
    patch: &Value,
    fields: &[&[&str]],
    normalize_entity: N,
) -> bool
where
    T: Entity + Clone + Serialize,
    N: Fn(&Value) -> T,
{
    let base = items
        .iter()
        .find(|item| item.id() == id)
        .or_else(|| selected.as_ref().filter(|s| s.id() == id))
        .cloned();
    let Some(base) = base else {
        return false;
    };

    let mut merged = match serde_json::to_value(&base) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("sync: failed to serialize entity {} for patch: {}", id, e);
            return false;
        }
    };
    normalize::merge_patch(&mut merged, patch, fields);
    let mut patched = normalize_entity(&merged);
    if patched.id() != id {
        // A patch never re-keys an entity.
        merged["id"] = Value::String(id.to_string());
        patched = normalize_entity(&merged);
    }
    replace_by_id(items, selected, patched)
}

/// Remove the entity with `id`, clearing the selection if it pointed there.
pub fn remove_by_id<T: Entity>(items: &mut Vec<T>, selected: &mut Option<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|item| item.id() != id);
    let was_selected = same_id(selected, id);
    if was_selected {
        *selected = None;
    }
    was_selected || items.len() != before
}

/// Entity id carried by a push payload: `data.<key>` for the given keys, then
/// `data.id`, or `data` itself when it is a bare string.
pub fn event_id(data: &Value, keys: &[&str]) -> Option<String> {
    if let Some(id) = data.as_str() {
        return Some(id.to_string()).filter(|id| !id.is_empty());
    }
    normalize::text(data, keys).or_else(|| normalize::text(data, &["id"]))
}

/// Patch payload of an `updated` event: `data.changes`/`data.updates` when the
/// server wraps it, otherwise `data` itself.
pub fn event_patch(data: &Value) -> &Value {
    normalize::field(data, &["changes", "updates", "patch"])
        .filter(|value| value.is_object())
        .unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        label: String,
        #[serde(default)]
        score: u32,
    }

    impl Entity for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, label: &str) -> Item {
        Item {
            id: id.into(),
            label: label.into(),
            score: 0,
        }
    }

    fn from_value(raw: &Value) -> Item {
        serde_json::from_value(raw.clone()).unwrap()
    }

    #[test]
    fn test_upsert_front_prepends_and_dedupes() {
        let mut items = vec![item("1", "one")];
        let mut selected = None;
        upsert_front(&mut items, &mut selected, item("2", "two"));
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["2", "1"]);

        upsert_front(&mut items, &mut selected, item("1", "uno"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].label, "uno");
    }

    #[test]
    fn test_replace_updates_list_and_selection() {
        let mut items = vec![item("1", "one"), item("2", "two")];
        let mut selected = Some(item("2", "two"));
        assert!(replace_by_id(&mut items, &mut selected, item("2", "TWO")));
        assert_eq!(items[1].label, "TWO");
        assert_eq!(selected.unwrap().label, "TWO");

        let mut other = Some(item("9", "nine"));
        assert!(!replace_by_id(&mut items, &mut other, item("3", "three")));
        assert_eq!(other.unwrap().label, "nine");
    }

    #[test]
    fn test_patch_preserves_omitted_fields() {
        let mut items = vec![Item {
            id: "1".into(),
            label: "one".into(),
            score: 10,
        }];
        let mut selected = Some(items[0].clone());
        assert!(patch_by_id(&mut items, &mut selected, "1", &json!({"score": 42}), &[], from_value));
        assert_eq!(items[0], Item { id: "1".into(), label: "one".into(), score: 42 });
        assert_eq!(selected.as_ref(), Some(&items[0]));

        // Patches cannot re-key
        patch_by_id(&mut items, &mut selected, "1", &json!({"id": "7"}), &[], from_value);
        assert_eq!(items[0].id, "1");
    }

    #[test]
    fn test_patch_applies_to_selection_outside_list() {
        let mut items: Vec<Item> = vec![];
        let mut selected = Some(item("5", "five"));
        assert!(patch_by_id(&mut items, &mut selected, "5", &json!({"label": "FIVE"}), &[], from_value));
        assert_eq!(selected.unwrap().label, "FIVE");
    }

    #[test]
    fn test_remove_clears_selection() {
        let mut items = vec![item("1", "one"), item("2", "two")];
        let mut selected = Some(item("1", "one"));
        assert!(remove_by_id(&mut items, &mut selected, "1"));
        assert_eq!(items.len(), 1);
        assert!(selected.is_none());
        assert!(!remove_by_id(&mut items, &mut selected, "404"));
    }

    #[test]
    fn test_event_id_shapes() {
        assert_eq!(event_id(&json!("c1"), &[]), Some("c1".into()));
        assert_eq!(event_id(&json!({"id": "c2"}), &["contactId"]), Some("c2".into()));
        assert_eq!(event_id(&json!({"contactId": "c3", "id": "x"}), &["contactId"]), Some("c3".into()));
        assert_eq!(event_id(&json!({"id": 12}), &[]), Some("12".into()));
        assert_eq!(event_id(&json!({}), &[]), None);
    }

    #[test]
    fn test_event_patch_unwraps_changes() {
        let wrapped = json!({"id": "1", "changes": {"score": 3}});
        assert_eq!(event_patch(&wrapped), &json!({"score": 3}));
        let bare = json!({"id": "1", "score": 3});
        assert_eq!(event_patch(&bare), &bare);
    }
}
