//! Turns deferred `S`/`T`/`p`/`F` events into async slices.

use std::collections::HashMap;

use super::record::as_string;
use super::{sort_deferred, DeferredEvent};
use crate::base::string_color_id;
use crate::domain::WarningKind;
use crate::model::{AsyncSlice, AsyncStepKind, TraceModel};

pub(super) fn create_async_slices(model: &mut TraceModel, events: &mut [DeferredEvent]) {
    if events.is_empty() {
        return;
    }
    sort_deferred(events);

    let mut open: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        let record = &event.record;
        let Some(name) = record.name.clone() else {
            model.import_warning(
                WarningKind::AsyncSliceParseError,
                "Async events (ph: S, T, p, or F) require a name parameter.",
            );
            continue;
        };
        let Some(id) = record.id.clone() else {
            model.import_warning(
                WarningKind::AsyncSliceParseError,
                "Async events (ph: S, T, p, or F) require an id parameter.",
            );
            continue;
        };

        let key = (name, id);
        if record.ph == "S" {
            if open.contains_key(&key) {
                model.import_warning(
                    WarningKind::AsyncSliceParseError,
                    format!("At {}, a slice of the same id {} was already open.", record.ts, key.1),
                );
                continue;
            }
            open.insert(key, vec![index]);
            continue;
        }

        let Some(chain) = open.get_mut(&key) else {
            model.import_warning(
                WarningKind::AsyncSliceParseError,
                format!("At {}, no slice named {} with id={} was open.", record.ts, key.0, key.1),
            );
            continue;
        };
        chain.push(index);
        if record.ph != "F" {
            continue;
        }

        let Some(chain) = open.remove(&key) else {
            continue;
        };
        let chain: Vec<&DeferredEvent> = chain.iter().map(|&i| &events[i]).collect();
        match build_async_slice(&key.0, &key.1, &chain) {
            Ok(slice) => {
                if let Some(thread) = model.thread_mut(slice.start_thread) {
                    thread.async_slice_group.push(slice);
                }
            }
            Err(message) => model.import_warning(WarningKind::AsyncSliceParseError, message),
        }
    }
}

/// Builds the slice for one `S` ... `F` chain.
///
/// `T` steps label the segment that follows them, `p` steps the segment
/// that precedes them. Each segment carries the `S` args merged with the
/// args of the step that labels it; with `T` steps the `F` args also go to
/// the last segment.
fn build_async_slice(name: &str, id: &str, chain: &[&DeferredEvent]) -> Result<AsyncSlice, String> {
    let (Some(first), Some(last)) = (chain.first(), chain.last()) else {
        return Err(format!("Async slice {name} with id={id} has no events."));
    };
    let step_type = chain.get(1).map_or("F", |e| e.record.ph.as_str());

    let mut slice = AsyncSlice::new(
        &first.record.cat,
        name,
        id,
        first.record.ts_ms(),
        first.thread,
        first.record.args_map(),
    );
    slice.duration = last.record.ts_ms() - first.record.ts_ms();
    slice.end_thread = last.thread;
    slice.step_kind = match step_type {
        "T" => Some(AsyncStepKind::Begin),
        "p" => Some(AsyncStepKind::Past),
        _ => None,
    };

    for (j, pair) in chain.windows(2).enumerate() {
        let (prev, event) = (pair[0], pair[1]);
        let ph = event.record.ph.as_str();
        if (ph == "T" || ph == "p") && ph != step_type {
            return Err(format!(
                "At {}, a slice named {name} with id={id} had both begin and end steps, which is not allowed.",
                event.record.ts
            ));
        }

        let target = if step_type == "T" { prev } else { event };
        let sub_name = match (target.record.ph.as_str(), target.record.arg("step")) {
            ("T" | "p", Some(step)) => {
                format!("{name}:{}", as_string(step).unwrap_or_else(|| step.to_string()))
            }
            _ => name.to_string(),
        };

        let mut args = first.record.args_map();
        args.extend(target.record.args_map());
        let is_last = j + 2 == chain.len();
        if is_last && step_type == "T" {
            args.extend(event.record.args_map());
        }

        let mut sub = AsyncSlice::new(&first.record.cat, &sub_name, id, prev.record.ts_ms(), prev.thread, args);
        sub.color_id = string_color_id(&format!("{sub_name}{}", j + 1));
        sub.duration = event.record.ts_ms() - prev.record.ts_ms();
        sub.end_thread = event.thread;
        slice.sub_slices.push(sub);
    }
    Ok(slice)
}
