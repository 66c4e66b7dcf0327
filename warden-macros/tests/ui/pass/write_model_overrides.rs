extern crate self as warden;

pub use warden_core::{event, write_model};

use serde::{Deserialize, Serialize};
use warden_macros::{DomainEvent, WriteModel};
use write_model::{Apply, State};

mod v1 {
    use super::{Deserialize, DomainEvent, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
    #[event(kind = "door.v1.added")]
    pub struct Added;
}

mod v2 {
    use super::{Deserialize, DomainEvent, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
    #[event(kind = "door.v2.added")]
    pub struct Added;
}

#[derive(Default)]
pub struct Lifecycle(bool);

impl State for Lifecycle {
    fn exists(&self) -> bool {
        self.0
    }
}

#[derive(Default, WriteModel)]
#[write_model(
    aggregate = "door",
    event_enum = "DoorChange",
    state = "lifecycle",
    events(v1::Added, v2::Added)
)]
pub struct Door {
    lifecycle: Lifecycle,
}

impl Apply<v1::Added> for Door {
    fn apply(&mut self, _event: &v1::Added) {
        self.lifecycle = Lifecycle(true);
    }
}

impl Apply<v2::Added> for Door {
    fn apply(&mut self, _event: &v2::Added) {
        self.lifecycle = Lifecycle(true);
    }
}

fn main() {
    let _first = DoorChange::V1Added(v1::Added);
    let _second = DoorChange::V2Added(v2::Added);
}
