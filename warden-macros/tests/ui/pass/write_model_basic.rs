extern crate self as warden;

pub use warden_core::{event, write_model};

use event::{EventSet, PendingEvent};
use serde::{Deserialize, Serialize};
use warden_macros::{DomainEvent, WriteModel};
use write_model::{Apply, State, WriteModel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "lamp.switched_on")]
pub struct SwitchedOn {
    pub watts: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, DomainEvent)]
pub struct SwitchedOff;

#[derive(Default)]
pub struct Lit(bool);

impl State for Lit {
    fn exists(&self) -> bool {
        self.0
    }
}

#[derive(Default, WriteModel)]
#[write_model(aggregate = "lamp", events(SwitchedOn, SwitchedOff), derives(Debug, PartialEq))]
pub struct Lamp {
    state: Lit,
    watts: u32,
}

impl Apply<SwitchedOn> for Lamp {
    fn apply(&mut self, event: &SwitchedOn) {
        self.state = Lit(true);
        self.watts = event.watts;
    }
}

impl Apply<SwitchedOff> for Lamp {
    fn apply(&mut self, _event: &SwitchedOff) {
        self.state = Lit(false);
    }
}

fn main() {
    assert_eq!(Lamp::AGGREGATE_TYPE, "lamp");
    assert_eq!(
        LampEvent::EVENT_TYPES,
        &["lamp.switched_on", "switched-off"]
    );

    let mut lamp = Lamp::default();
    WriteModel::apply(&mut lamp, &LampEvent::from(SwitchedOn { watts: 40 }));
    assert!(WriteModel::exists(&lamp));
    assert_eq!(lamp.watts, 40);

    let pending: PendingEvent = LampEvent::SwitchedOff(SwitchedOff).encode().unwrap();
    assert_eq!(pending.event_type, "switched-off");
}
