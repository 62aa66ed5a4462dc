//! Conversion between board records and Loro values.

use std::collections::BTreeMap;

use kurbo::Point;
use loro::{Container, LoroList, LoroMap, LoroMapValue, LoroResult, LoroValue, ValueOrContainer};

use crate::model::{
    Attribute, ClassBody, Connection, ConnectionKind, EnumBody, Item, ItemKind, ItemTag,
    MessageLinks, Operation, Parameter, Visibility,
};

// Common keys
const KEY_ID: &str = "id";
const KEY_KIND: &str = "kind";
const KEY_LABEL: &str = "label";

// Geometry keys
const KEY_X: &str = "x";
const KEY_Y: &str = "y";
const KEY_WIDTH: &str = "width";
const KEY_HEIGHT: &str = "height";
const KEY_ROTATION: &str = "rotation";

// Relationship keys
const KEY_PARENT: &str = "parent";
const KEY_CHILDREN: &str = "children";
const KEY_FIELDS: &str = "fields";

// Payload keys
const KEY_PRODUCES: &str = "produces";
const KEY_CONNECTED_POLICIES: &str = "connected_policies";
const KEY_STEREOTYPE: &str = "stereotype";
const KEY_ATTRIBUTES: &str = "attributes";
const KEY_OPERATIONS: &str = "operations";
const KEY_LITERALS: &str = "literals";
const PAYLOAD_KEYS: [&str; 6] = [
    KEY_PRODUCES,
    KEY_CONNECTED_POLICIES,
    KEY_STEREOTYPE,
    KEY_ATTRIBUTES,
    KEY_OPERATIONS,
    KEY_LITERALS,
];

// Member keys
const KEY_NAME: &str = "name";
const KEY_TYPE: &str = "type";
const KEY_VISIBILITY: &str = "visibility";
const KEY_PARAMETERS: &str = "parameters";
const KEY_RETURN_TYPE: &str = "return_type";

// Connection keys
const KEY_FROM: &str = "from";
const KEY_TO: &str = "to";
const KEY_POINTS: &str = "points";
const KEY_FROM_MULTIPLICITY: &str = "from_multiplicity";
const KEY_TO_MULTIPLICITY: &str = "to_multiplicity";

// Helper functions to extract values from LoroMapValue (derefs to HashMap<String, LoroValue>)

fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_list<'a>(map: &'a LoroMapValue, key: &str) -> Vec<&'a LoroValue> {
    match map.get(key) {
        Some(LoroValue::List(list)) => list.iter().collect(),
        _ => Vec::new(),
    }
}

fn get_string_list(map: &LoroMapValue, key: &str) -> Vec<String> {
    get_list(map, key)
        .into_iter()
        .filter_map(|v| match v {
            LoroValue::String(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

fn as_double(value: &LoroValue) -> Option<f64> {
    match value {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

// Writers

/// The nested map under `key`, inserted if the entry is missing or not a map.
pub(crate) fn child_map(parent: &LoroMap, key: &str) -> LoroResult<LoroMap> {
    match parent.get(key) {
        Some(ValueOrContainer::Container(Container::Map(map))) => Ok(map),
        _ => parent.insert_container(key, LoroMap::new()),
    }
}

fn set_optional_string(map: &LoroMap, key: &str, value: Option<&str>) -> LoroResult<()> {
    match value {
        Some(v) => map.insert(key, v)?,
        None => {
            if map.get(key).is_some() {
                map.delete(key)?;
            }
        }
    }
    Ok(())
}

fn write_string_list(map: &LoroMap, key: &str, values: &[String]) -> LoroResult<()> {
    let list = map.insert_container(key, LoroList::new())?;
    for value in values {
        list.push(value.as_str())?;
    }
    Ok(())
}

fn write_fields(map: &LoroMap, fields: &BTreeMap<String, String>) -> LoroResult<()> {
    let fields_map = map.insert_container(KEY_FIELDS, LoroMap::new())?;
    for (key, value) in fields {
        fields_map.insert(key, value.as_str())?;
    }
    Ok(())
}

/// Per-key update of the free-form fields map.
fn update_fields(
    map: &LoroMap,
    current: &BTreeMap<String, String>,
    next: &BTreeMap<String, String>,
) -> LoroResult<()> {
    let fields_map = child_map(map, KEY_FIELDS)?;
    for (key, value) in next {
        if current.get(key) != Some(value) {
            fields_map.insert(key, value.as_str())?;
        }
    }
    for key in current.keys() {
        if !next.contains_key(key) {
            fields_map.delete(key)?;
        }
    }
    Ok(())
}

fn write_attributes(map: &LoroMap, attributes: &[Attribute]) -> LoroResult<()> {
    let list = map.insert_container(KEY_ATTRIBUTES, LoroList::new())?;
    for attribute in attributes {
        let entry = list.insert_container(list.len(), LoroMap::new())?;
        entry.insert(KEY_NAME, attribute.name.as_str())?;
        entry.insert(KEY_TYPE, attribute.type_name.as_str())?;
        entry.insert(KEY_VISIBILITY, attribute.visibility.as_str())?;
    }
    Ok(())
}

fn write_operations(map: &LoroMap, operations: &[Operation]) -> LoroResult<()> {
    let list = map.insert_container(KEY_OPERATIONS, LoroList::new())?;
    for operation in operations {
        let entry = list.insert_container(list.len(), LoroMap::new())?;
        entry.insert(KEY_NAME, operation.name.as_str())?;
        entry.insert(KEY_RETURN_TYPE, operation.return_type.as_str())?;
        entry.insert(KEY_VISIBILITY, operation.visibility.as_str())?;
        let params = entry.insert_container(KEY_PARAMETERS, LoroList::new())?;
        for param in &operation.parameters {
            let param_map = params.insert_container(params.len(), LoroMap::new())?;
            param_map.insert(KEY_NAME, param.name.as_str())?;
            param_map.insert(KEY_TYPE, param.type_name.as_str())?;
        }
    }
    Ok(())
}

fn write_points(map: &LoroMap, points: &[Point]) -> LoroResult<()> {
    // Stored as a list of [x, y] pairs
    let points_list = map.insert_container(KEY_POINTS, LoroList::new())?;
    for point in points {
        let pair = points_list.insert_container(points_list.len(), LoroList::new())?;
        pair.push(point.x)?;
        pair.push(point.y)?;
    }
    Ok(())
}

fn clear_payload(map: &LoroMap) -> LoroResult<()> {
    for key in PAYLOAD_KEYS {
        if map.get(key).is_some() {
            map.delete(key)?;
        }
    }
    Ok(())
}

/// Write the payload of `next`, skipping parts equal to `current`.
fn write_payload(map: &LoroMap, current: Option<&ItemKind>, next: &ItemKind) -> LoroResult<()> {
    match next {
        ItemKind::MessageTrigger(links) | ItemKind::MessageResult(links) => {
            let old = current.and_then(ItemKind::message_links);
            if old.map(|o| &o.produces) != Some(&links.produces) {
                set_optional_string(map, KEY_PRODUCES, links.produces.as_deref())?;
            }
            if old.map(|o| &o.connected_policies) != Some(&links.connected_policies) {
                write_string_list(map, KEY_CONNECTED_POLICIES, &links.connected_policies)?;
            }
        }
        ItemKind::Class(body) | ItemKind::Interface(body) => {
            let old = current.and_then(ItemKind::class_body);
            if old.map(|o| &o.stereotype) != Some(&body.stereotype) {
                set_optional_string(map, KEY_STEREOTYPE, body.stereotype.as_deref())?;
            }
            if old.map(|o| &o.attributes) != Some(&body.attributes) {
                write_attributes(map, &body.attributes)?;
            }
            if old.map(|o| &o.operations) != Some(&body.operations) {
                write_operations(map, &body.operations)?;
            }
        }
        ItemKind::Enum(body) => {
            let unchanged = matches!(current, Some(ItemKind::Enum(old)) if old.literals == body.literals);
            if !unchanged {
                write_string_list(map, KEY_LITERALS, &body.literals)?;
            }
        }
        ItemKind::Policy
        | ItemKind::StateHolder
        | ItemKind::Actor
        | ItemKind::ReadModel
        | ItemKind::ContextContainer
        | ItemKind::Component
        | ItemKind::Package => {}
    }
    Ok(())
}

/// Write every field of an item into a fresh map.
pub fn item_to_loro(item: &Item, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, item.id.as_str())?;
    map.insert(KEY_KIND, item.tag().as_str())?;
    map.insert(KEY_LABEL, item.label.as_str())?;
    map.insert(KEY_X, item.x)?;
    map.insert(KEY_Y, item.y)?;
    map.insert(KEY_WIDTH, item.width)?;
    map.insert(KEY_HEIGHT, item.height)?;
    map.insert(KEY_ROTATION, item.rotation)?;
    set_optional_string(map, KEY_PARENT, item.parent.as_deref())?;
    write_string_list(map, KEY_CHILDREN, &item.children)?;
    write_fields(map, &item.fields)?;
    write_payload(map, None, &item.kind)
}

/// Overwrite an existing item map so it reads back as `next`.
///
/// Only fields that differ from `current` are written, so concurrent edits to
/// other fields of the same item survive the merge.
/// Returns the number of top-level fields touched.
pub fn item_update_loro(current: &Item, next: &Item, map: &LoroMap) -> LoroResult<usize> {
    let mut touched = 0;

    macro_rules! write_if_changed {
        ($field:ident, $key:expr, $value:expr) => {
            if current.$field != next.$field {
                map.insert($key, $value)?;
                touched += 1;
            }
        };
    }

    write_if_changed!(label, KEY_LABEL, next.label.as_str());
    write_if_changed!(x, KEY_X, next.x);
    write_if_changed!(y, KEY_Y, next.y);
    write_if_changed!(width, KEY_WIDTH, next.width);
    write_if_changed!(height, KEY_HEIGHT, next.height);
    write_if_changed!(rotation, KEY_ROTATION, next.rotation);

    if current.parent != next.parent {
        set_optional_string(map, KEY_PARENT, next.parent.as_deref())?;
        touched += 1;
    }
    if current.children != next.children {
        write_string_list(map, KEY_CHILDREN, &next.children)?;
        touched += 1;
    }
    if current.fields != next.fields {
        update_fields(map, &current.fields, &next.fields)?;
        touched += 1;
    }
    if current.kind != next.kind {
        if current.tag() != next.tag() {
            map.insert(KEY_KIND, next.tag().as_str())?;
            clear_payload(map)?;
            write_payload(map, None, &next.kind)?;
        } else {
            write_payload(map, Some(&current.kind), &next.kind)?;
        }
        touched += 1;
    }
    Ok(touched)
}

fn attribute_from_loro(value: &LoroValue) -> Option<Attribute> {
    let LoroValue::Map(map) = value else {
        return None;
    };
    Some(Attribute {
        name: get_string(map, KEY_NAME)?,
        type_name: get_string(map, KEY_TYPE).unwrap_or_default(),
        visibility: get_string(map, KEY_VISIBILITY)
            .and_then(|v| Visibility::parse(&v))
            .unwrap_or_default(),
    })
}

fn operation_from_loro(value: &LoroValue) -> Option<Operation> {
    let LoroValue::Map(map) = value else {
        return None;
    };
    let parameters = get_list(map, KEY_PARAMETERS)
        .into_iter()
        .filter_map(|p| match p {
            LoroValue::Map(param) => Some(Parameter {
                name: get_string(param, KEY_NAME)?,
                type_name: get_string(param, KEY_TYPE).unwrap_or_default(),
            }),
            _ => None,
        })
        .collect();
    Some(Operation {
        name: get_string(map, KEY_NAME)?,
        parameters,
        return_type: get_string(map, KEY_RETURN_TYPE).unwrap_or_default(),
        visibility: get_string(map, KEY_VISIBILITY)
            .and_then(|v| Visibility::parse(&v))
            .unwrap_or_default(),
    })
}

fn kind_from_loro(tag: ItemTag, map: &LoroMapValue) -> ItemKind {
    let links = || MessageLinks {
        produces: get_string(map, KEY_PRODUCES),
        connected_policies: get_string_list(map, KEY_CONNECTED_POLICIES),
    };
    let class_body = || ClassBody {
        stereotype: get_string(map, KEY_STEREOTYPE),
        attributes: get_list(map, KEY_ATTRIBUTES)
            .into_iter()
            .filter_map(attribute_from_loro)
            .collect(),
        operations: get_list(map, KEY_OPERATIONS)
            .into_iter()
            .filter_map(operation_from_loro)
            .collect(),
    };
    match tag {
        ItemTag::MessageTrigger => ItemKind::MessageTrigger(links()),
        ItemTag::MessageResult => ItemKind::MessageResult(links()),
        ItemTag::Class => ItemKind::Class(class_body()),
        ItemTag::Interface => ItemKind::Interface(class_body()),
        ItemTag::Enum => ItemKind::Enum(EnumBody {
            literals: get_string_list(map, KEY_LITERALS),
        }),
        other => ItemKind::empty(other),
    }
}

/// Read an item from its deep map value.
pub fn item_from_loro(map: &LoroMapValue) -> Option<Item> {
    let id = get_string(map, KEY_ID)?;
    let tag = ItemTag::parse(&get_string(map, KEY_KIND)?)?;

    let fields = match map.get(KEY_FIELDS) {
        Some(LoroValue::Map(fields)) => fields
            .iter()
            .filter_map(|(k, v)| match v {
                LoroValue::String(s) => Some((k.to_string(), s.to_string())),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    Some(Item {
        id,
        kind: kind_from_loro(tag, map),
        label: get_string(map, KEY_LABEL).unwrap_or_default(),
        x: get_double(map, KEY_X)?,
        y: get_double(map, KEY_Y)?,
        width: get_double(map, KEY_WIDTH)?,
        height: get_double(map, KEY_HEIGHT)?,
        rotation: get_double(map, KEY_ROTATION).unwrap_or(0.0),
        parent: get_string(map, KEY_PARENT),
        children: get_string_list(map, KEY_CHILDREN),
        fields,
    })
}

/// Write every field of a connection into a fresh map.
pub fn connection_to_loro(connection: &Connection, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, connection.id.as_str())?;
    map.insert(KEY_FROM, connection.from.as_str())?;
    map.insert(KEY_TO, connection.to.as_str())?;
    map.insert(KEY_KIND, connection.kind.as_str())?;
    if let Some(points) = &connection.points {
        write_points(map, points)?;
    }
    set_optional_string(map, KEY_FROM_MULTIPLICITY, connection.from_multiplicity.as_deref())?;
    set_optional_string(map, KEY_TO_MULTIPLICITY, connection.to_multiplicity.as_deref())?;
    Ok(())
}

/// Overwrite an existing connection map so it reads back as `next`.
pub fn connection_update_loro(current: &Connection, next: &Connection, map: &LoroMap) -> LoroResult<usize> {
    let mut touched = 0;
    if current.from != next.from {
        map.insert(KEY_FROM, next.from.as_str())?;
        touched += 1;
    }
    if current.to != next.to {
        map.insert(KEY_TO, next.to.as_str())?;
        touched += 1;
    }
    if current.kind != next.kind {
        map.insert(KEY_KIND, next.kind.as_str())?;
        touched += 1;
    }
    if current.points != next.points {
        match &next.points {
            Some(points) => write_points(map, points)?,
            None => map.delete(KEY_POINTS)?,
        }
        touched += 1;
    }
    if current.from_multiplicity != next.from_multiplicity {
        set_optional_string(map, KEY_FROM_MULTIPLICITY, next.from_multiplicity.as_deref())?;
        touched += 1;
    }
    if current.to_multiplicity != next.to_multiplicity {
        set_optional_string(map, KEY_TO_MULTIPLICITY, next.to_multiplicity.as_deref())?;
        touched += 1;
    }
    Ok(touched)
}

/// Read a connection from its deep map value.
pub fn connection_from_loro(map: &LoroMapValue) -> Option<Connection> {
    let points = match map.get(KEY_POINTS) {
        Some(LoroValue::List(list)) => Some(
            list.iter()
                .filter_map(|p| match p {
                    LoroValue::List(coords) => {
                        Some(Point::new(as_double(coords.first()?)?, as_double(coords.get(1)?)?))
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    };

    Some(Connection {
        id: get_string(map, KEY_ID)?,
        from: get_string(map, KEY_FROM)?,
        to: get_string(map, KEY_TO)?,
        kind: get_string(map, KEY_KIND)
            .and_then(|k| ConnectionKind::parse(&k))
            .unwrap_or_default(),
        points,
        from_multiplicity: get_string(map, KEY_FROM_MULTIPLICITY),
        to_multiplicity: get_string(map, KEY_TO_MULTIPLICITY),
    })
}
