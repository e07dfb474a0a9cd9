//! Object instances: explicit `N`/`O`/`D` events, implicit snapshots nested
//! in snapshot args, and `id_ref` resolution.

use serde_json::{json, Value};
use std::mem;

use super::record::as_string;
use super::{sort_deferred, DeferredEvent};
use crate::domain::{Args, WarningKind};
use crate::model::{ObjectCollection, Process, ResolvedRef, SnapshotRef, TraceModel};

pub(super) fn create_explicit_objects(model: &mut TraceModel, events: &mut [DeferredEvent]) {
    if events.is_empty() {
        return;
    }
    sort_deferred(events);

    for event in events.iter() {
        let record = &event.record;
        let (Some(name), Some(id)) = (&record.name, &record.id) else {
            model.import_warning(
                WarningKind::ObjectParseError,
                format!(
                    "While processing {} event at ts={}: Object events require a name and an id parameter.",
                    record.ph, record.ts
                ),
            );
            continue;
        };

        let ts = record.ts_ms();
        let objects = &mut model.get_or_create_process(event.thread.pid).objects;
        let result = match record.ph.as_str() {
            "N" => objects
                .id_was_created(id, &record.cat, name, ts)
                .map(drop)
                .map_err(|e| format!("While processing create of {id} at ts={ts}: {e}")),
            "O" => match record.arg("snapshot") {
                Some(snapshot) => {
                    let mut snapshot = snapshot.clone();
                    let category = take_string_field(&mut snapshot, "cat").unwrap_or_else(|| record.cat.clone());
                    let base_type = take_string_field(&mut snapshot, "base_type");
                    objects
                        .add_snapshot(id, &category, name, ts, snapshot, base_type.as_deref())
                        .map(drop)
                        .map_err(|e| format!("While processing snapshot of {id} at ts={ts}: {e}"))
                }
                None => Err(format!(
                    "While processing {id} at ts={ts}: Snapshots must have args: {{snapshot: ...}}"
                )),
            },
            "D" => objects
                .id_was_deleted(id, &record.cat, name, ts)
                .map(drop)
                .map_err(|e| format!("While processing delete of {id} at ts={ts}: {e}")),
            _ => Ok(()),
        };
        if let Err(message) = result {
            model.import_warning(WarningKind::ObjectParseError, message);
        }
    }
}

/// Removes `key` from a snapshot object when it holds a string.
fn take_string_field(snapshot: &mut Value, key: &str) -> Option<String> {
    let map = snapshot.as_object_mut()?;
    match map.remove(key)? {
        Value::String(s) => Some(s),
        other => {
            map.insert(key.to_string(), other);
            None
        }
    }
}

struct ImplicitScope<'a> {
    objects: &'a mut ObjectCollection,
    containing: &'a SnapshotRef,
    ts: f64,
    category: &'a str,
    warnings: &'a mut Vec<String>,
}

/// Promotes objects carrying `"id": "<type>/<id>"` inside snapshot args to
/// snapshots of their own, leaving `{"id_ref": "<id>"}` in their place.
pub(super) fn create_implicit_objects(model: &mut TraceModel) {
    let mut warnings = Vec::new();
    for process in model.processes.values_mut() {
        create_implicit_objects_for_process(&mut process.objects, &mut warnings);
    }
    for message in warnings {
        model.import_warning(WarningKind::ObjectSnapshotParseError, message);
    }
}

fn create_implicit_objects_for_process(objects: &mut ObjectCollection, warnings: &mut Vec<String>) {
    for containing in objects.all_snapshot_refs() {
        let Some(snapshot) = objects.snapshot_mut(&containing) else {
            continue;
        };
        let ts = snapshot.ts;
        let mut args = mem::take(&mut snapshot.args);

        if args.get("id").is_some() {
            warnings.push(format!(
                "While processing snapshot of {} at ts={ts}: args cannot have an id field inside it",
                containing.id
            ));
        } else {
            let category = objects
                .instance(&containing)
                .map(|inst| inst.category.clone())
                .unwrap_or_default();
            let mut scope = ImplicitScope {
                objects: &mut *objects,
                containing: &containing,
                ts,
                category: &category,
                warnings: &mut *warnings,
            };
            visit_children(&mut args, &mut scope);
        }

        if let Some(snapshot) = objects.snapshot_mut(&containing) {
            snapshot.args = args;
        }
    }
}

fn visit_children(value: &mut Value, scope: &mut ImplicitScope<'_>) {
    match value {
        Value::Object(map) => {
            for field in map.values_mut() {
                process_field(field, scope);
            }
        }
        Value::Array(items) => {
            for item in items {
                process_field(item, scope);
            }
        }
        _ => {}
    }
}

fn process_field(field: &mut Value, scope: &mut ImplicitScope<'_>) {
    let Some(raw_id) = field.get("id").and_then(as_string) else {
        visit_children(field, scope);
        return;
    };
    let Some((type_name, id)) = split_implicit_id(&raw_id) else {
        scope.warnings.push(format!(
            "While processing implicit snapshot of {raw_id} at ts={}: Implicit snapshots must have names.",
            scope.ts
        ));
        return;
    };
    if let Some(map) = field.as_object_mut() {
        map.remove("id");
    }

    // Nested implicit objects become snapshots before their container does.
    visit_children(field, scope);

    match scope
        .objects
        .add_snapshot(id, scope.category, type_name, scope.ts, field.clone(), None)
    {
        Ok(snapshot_ref) => {
            if let Some(instance) = scope.objects.instance_mut(&snapshot_ref) {
                instance.has_implicit_snapshots = true;
            }
            if let Some(snapshot) = scope.objects.snapshot_mut(&snapshot_ref) {
                snapshot.containing_snapshot = Some(scope.containing.clone());
            }
            *field = json!({ "id_ref": id });
        }
        Err(e) => scope.warnings.push(format!(
            "While processing implicit snapshot of {raw_id} at ts={}: {e}",
            scope.ts
        )),
    }
}

/// Splits `"<type>/<id>"` at the last slash that leaves both halves
/// non-empty.
fn split_implicit_id(raw: &str) -> Option<(&str, &str)> {
    raw.match_indices('/')
        .map(|(i, _)| i)
        .rev()
        .find(|&i| i > 0 && i + 1 < raw.len())
        .map(|i| (&raw[..i], &raw[i + 1..]))
}

/// Records every `id_ref`/`idRef` reachable from slice, async slice and
/// snapshot args. Safe to run more than once.
pub(super) fn join_object_refs(model: &mut TraceModel) {
    for process in model.processes.values_mut() {
        let Process { threads, objects, .. } = process;
        for thread in threads.values_mut() {
            for slice in thread.slice_group.slices_mut() {
                slice.resolved_refs = refs_in_args(objects, &slice.args, slice.start);
            }
            for slice in &mut thread.async_slice_group.slices {
                slice.resolved_refs = refs_in_args(objects, &slice.args, slice.start);
            }
        }

        for snapshot_ref in objects.all_snapshot_refs() {
            let Some(snapshot) = objects.snapshot(&snapshot_ref) else {
                continue;
            };
            let mut refs = Vec::new();
            collect_refs(objects, &snapshot.args, snapshot.ts, String::new(), &mut refs);
            if let Some(snapshot) = objects.snapshot_mut(&snapshot_ref) {
                snapshot.resolved_refs = refs;
            }
        }
    }
}

fn refs_in_args(objects: &ObjectCollection, args: &Args, ts: f64) -> Vec<ResolvedRef> {
    let mut refs = Vec::new();
    for (key, value) in args {
        collect_refs(objects, value, ts, format!("/{}", escape_pointer_token(key)), &mut refs);
    }
    refs
}

fn collect_refs(objects: &ObjectCollection, value: &Value, ts: f64, pointer: String, refs: &mut Vec<ResolvedRef>) {
    match value {
        Value::Object(map) => {
            let ref_id = ["id_ref", "idRef"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(as_string))
                .find(|id| !id.is_empty() && id != "0");
            if let Some(id) = ref_id {
                if let Some(snapshot) = objects.snapshot_at(&id, ts) {
                    refs.push(ResolvedRef { pointer, snapshot });
                }
                return;
            }
            for (key, child) in map {
                collect_refs(objects, child, ts, format!("{pointer}/{}", escape_pointer_token(key)), refs);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_refs(objects, child, ts, format!("{pointer}/{i}"), refs);
            }
        }
        _ => {}
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportOptions;
    use crate::domain::{Pid, ThreadRef};
    use crate::import::TraceInput;

    fn import(events: Value) -> TraceModel {
        let options = ImportOptions { shift_world_to_zero: false, ..ImportOptions::default() };
        TraceModel::from_traces(vec![TraceInput::Json(events)], &options).unwrap()
    }

    #[test]
    fn test_split_implicit_id() {
        assert_eq!(split_implicit_id("cc::LayerImpl/0x7"), Some(("cc::LayerImpl", "0x7")));
        assert_eq!(split_implicit_id("a/b/c"), Some(("a/b", "c")));
        assert_eq!(split_implicit_id("a/b/"), Some(("a", "b/")));
        assert_eq!(split_implicit_id("0x7"), None);
        assert_eq!(split_implicit_id("/0x7"), None);
    }

    #[test]
    fn test_escape_pointer_token() {
        assert_eq!(escape_pointer_token("a/b~c"), "a~1b~0c");
    }

    #[test]
    fn test_explicit_lifetime() {
        let model = import(json!([
            {"name": "Foo", "cat": "c", "id": "0x1000", "pid": 1, "tid": 1, "ts": 10000, "ph": "N"},
            {"name": "Foo", "cat": "c", "id": "0x1000", "pid": 1, "tid": 1, "ts": 20000, "ph": "O",
             "args": {"snapshot": {"x": 1}}},
            {"name": "Foo", "cat": "c", "id": "0x1000", "pid": 1, "tid": 1, "ts": 30000, "ph": "D"}
        ]));
        let objects = &model.processes[&Pid(1)].objects;
        let instance = objects.instance_at("0x1000", 15.0).unwrap();
        assert_eq!(instance.creation_ts, 10.0);
        assert!(instance.creation_ts_was_explicit);
        assert_eq!(instance.deletion_ts, 30.0);
        assert!(instance.deletion_ts_was_explicit);
        assert_eq!(instance.snapshots[0].ts, 20.0);
        assert_eq!(instance.snapshots[0].args, json!({"x": 1}));
        assert!(!model.has_import_warnings());
    }

    #[test]
    fn test_explicit_object_errors() {
        let model = import(json!([
            {"name": "Foo", "id": "0x1", "pid": 1, "tid": 1, "ts": 10000, "ph": "O", "args": {}},
            {"name": "Foo", "id": "0x2", "pid": 1, "tid": 1, "ts": 10000, "ph": "N"},
            {"name": "Foo", "id": "0x2", "pid": 1, "tid": 1, "ts": 20000, "ph": "N"},
            {"id": "0x3", "pid": 1, "tid": 1, "ts": 20000, "ph": "N"}
        ]));
        let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::ObjectParseError; 3]);
    }

    #[test]
    fn test_snapshot_overrides_category_and_base_type() {
        let model = import(json!([
            {"name": "Derived", "cat": "c", "id": "0x1", "pid": 1, "tid": 1, "ts": 10000, "ph": "O",
             "args": {"snapshot": {"cat": "override", "base_type": "Base", "v": 1}}}
        ]));
        let instance = model.processes[&Pid(1)].objects.instance_at("0x1", 10.0).unwrap();
        assert_eq!(instance.category, "override");
        assert_eq!(instance.base_type.as_deref(), Some("Base"));
        assert_eq!(instance.snapshots[0].args, json!({"v": 1}));
    }

    #[test]
    fn test_unfinished_objects_are_auto_deleted() {
        let model = import(json!([
            {"name": "Foo", "id": "0x1", "pid": 1, "tid": 1, "ts": 10000, "ph": "N"},
            {"name": "a", "pid": 1, "tid": 1, "ts": 40000, "dur": 10000, "ph": "X"}
        ]));
        let instance = model.processes[&Pid(1)].objects.instance_at("0x1", 10.0).unwrap();
        assert_eq!(instance.deletion_ts, 50.0);
        assert!(!instance.deletion_ts_was_explicit);
    }

    #[test]
    fn test_implicit_snapshots() {
        let model = import(json!([
            {"name": "Tree", "cat": "c", "id": "0x1", "pid": 1, "tid": 1, "ts": 20000, "ph": "O",
             "args": {"snapshot": {
                 "child": {"id": "Bar/0x2", "v": 2, "leaf": {"id": "Leaf/0x4"}},
                 "list": [{"id": "Baz/0x3"}],
                 "plain": {"v": 3}
             }}}
        ]));
        let objects = &model.processes[&Pid(1)].objects;
        let tree = objects.instance_at("0x1", 20.0).unwrap();
        assert_eq!(
            tree.snapshots[0].args,
            json!({"child": {"id_ref": "0x2"}, "list": [{"id_ref": "0x3"}], "plain": {"v": 3}})
        );

        let bar = objects.instance_at("0x2", 20.0).unwrap();
        assert_eq!(bar.name, "Bar");
        assert_eq!(bar.category, "c");
        assert!(bar.has_implicit_snapshots);
        assert_eq!(bar.snapshots[0].args, json!({"v": 2, "leaf": {"id_ref": "0x4"}}));
        assert_eq!(bar.snapshots[0].containing_snapshot.as_ref().unwrap().id, "0x1");
        assert_eq!(objects.instance_at("0x4", 20.0).unwrap().name, "Leaf");

        let pointers: Vec<_> = tree.snapshots[0].resolved_refs.iter().map(|r| r.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/child", "/list/0"]);
        assert_eq!(tree.snapshots[0].resolved_refs[0].snapshot.id, "0x2");
        assert_eq!(bar.snapshots[0].resolved_refs[0].pointer, "/leaf");
        assert!(!model.has_import_warnings());
    }

    #[test]
    fn test_implicit_snapshot_errors() {
        let model = import(json!([
            {"name": "Tree", "id": "0x1", "pid": 1, "tid": 1, "ts": 20000, "ph": "O",
             "args": {"snapshot": {"child": {"id": "noslash"}}}},
            {"name": "Tree", "id": "0x5", "pid": 1, "tid": 1, "ts": 20000, "ph": "O",
             "args": {"snapshot": {"id": "Tree/0x5"}}}
        ]));
        let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::ObjectSnapshotParseError; 2]);
        let tree = model.processes[&Pid(1)].objects.instance_at("0x1", 20.0).unwrap();
        assert_eq!(tree.snapshots[0].args, json!({"child": {"id": "noslash"}}));
    }

    #[test]
    fn test_slice_args_resolve_refs() {
        let model = import(json!([
            {"name": "Foo", "id": "0x1", "pid": 1, "tid": 1, "ts": 10000, "ph": "O", "args": {"snapshot": {"v": 1}}},
            {"name": "Foo", "id": "0x1", "pid": 1, "tid": 1, "ts": 30000, "ph": "O", "args": {"snapshot": {"v": 2}}},
            {"name": "draw", "pid": 1, "tid": 1, "ts": 35000, "dur": 1000, "ph": "X",
             "args": {"a/b": {"idRef": "0x1"}, "none": {"id_ref": "0x9"}}},
            {"name": "early", "pid": 1, "tid": 1, "ts": 15000, "dur": 1000, "ph": "X",
             "args": {"target": {"id_ref": "0x1"}}}
        ]));
        let thread = model.thread(ThreadRef::new(1, 1)).unwrap();
        let slices = thread.slice_group.slices();
        assert_eq!(slices[0].title, "early");
        assert_eq!(slices[0].resolved_refs[0].snapshot.snapshot, 0);
        assert_eq!(slices[1].resolved_refs.len(), 1);
        assert_eq!(slices[1].resolved_refs[0].pointer, "/a~1b");
        assert_eq!(slices[1].resolved_refs[0].snapshot.snapshot, 1);
        assert_eq!(slices[1].args["a/b"], json!({"idRef": "0x1"}));
    }
}
