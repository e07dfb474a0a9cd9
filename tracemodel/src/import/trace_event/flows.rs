//! Links deferred `s`/`t`/`f` events into flows.

use std::collections::HashMap;

use super::{sort_deferred, DeferredEvent};
use crate::domain::WarningKind;
use crate::model::{FlowEvent, FlowPhase, TraceModel};

pub(super) fn create_flow_events(model: &mut TraceModel, events: &mut [DeferredEvent]) {
    if events.is_empty() {
        return;
    }
    sort_deferred(events);

    // Flow id -> index of the latest event of that flow.
    let mut open: HashMap<String, usize> = HashMap::new();
    for event in events.iter() {
        let record = &event.record;
        let (Some(name), Some(id)) = (&record.name, &record.id) else {
            model.import_warning(
                WarningKind::FlowSliceParseError,
                "Flow events (ph: s, t or f) require a name and an id parameter.",
            );
            continue;
        };
        let Some(phase) = FlowPhase::from_phase(&record.ph) else {
            continue;
        };

        let previous = open.get(id).copied();
        match (phase, previous) {
            (FlowPhase::Start, Some(_)) => {
                model.import_warning(
                    WarningKind::FlowSliceStartError,
                    format!("At {}, flow {id} was started again before it finished.", record.ts),
                );
                continue;
            }
            (FlowPhase::Step | FlowPhase::Finish, None) => {
                model.import_warning(
                    WarningKind::FlowSliceOrderingError,
                    format!(
                        "Found flow phase {} for id: {id} but no flow start found.",
                        phase.as_phase()
                    ),
                );
                continue;
            }
            _ => {}
        }

        let index = model.push_flow_event(FlowEvent::new(
            &record.cat,
            id,
            name,
            phase,
            record.ts_ms(),
            event.thread,
            record.args_map(),
        ));
        if let Some(previous) = previous {
            model.link_flow_events(previous, index);
        }
        if phase == FlowPhase::Finish {
            open.remove(id);
        } else {
            open.insert(id.clone(), index);
        }
    }
}
