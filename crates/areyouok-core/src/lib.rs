//! AreYouOK core
//!
//! A dead-man's switch: an owner locks value in a [`Switch`] and names a
//! beneficiary. The owner proves liveness by checking in at least once per
//! interval (3 days by default). Once a full interval passes without a
//! check-in, the beneficiary may sweep the whole balance.
//!
//! # Layout
//!
//! - [`switch`]: the pure custody state machine
//! - [`registry`]: factory, id assignment, indexes and the event journal
//! - [`store`]: persistence seam behind the registry
//! - [`heartbeat`]: how close a switch is to its deadline
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use areyouok_core::{Identity, ManualClock, Registry, CHECK_IN_INTERVAL, ONE_UNIT};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let registry = Registry::in_memory(clock.clone());
//!
//! let owner: Identity = "0x00000000000000000000000000000000000000a1".parse().unwrap();
//! let heir: Identity = "0x00000000000000000000000000000000000000b0".parse().unwrap();
//!
//! let id = registry.create_switch(owner, heir, ONE_UNIT).unwrap();
//! let switch = registry.switch(id).unwrap();
//! assert!(switch.withdraw(heir).is_err());
//!
//! clock.advance(CHECK_IN_INTERVAL);
//! assert_eq!(switch.withdraw(heir).unwrap(), ONE_UNIT);
//! ```

pub mod amount;
pub mod clock;
pub mod events;
pub mod heartbeat;
pub mod identity;
pub mod registry;
pub mod store;
pub mod switch;

#[cfg(test)]
mod test_utils;

pub use amount::{format_units, parse_units, Amount, AmountError, ONE_UNIT};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp, CHECK_IN_INTERVAL, SECS_PER_DAY};
pub use events::{EventRecord, SwitchEvent};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatStatus};
pub use identity::{Identity, IdentityError, SwitchId};
pub use registry::{Registry, RegistryEntry, RegistryError, SwitchHandle};
pub use store::{MemoryStore, RegistryStore, StoreError, StoredRegistry};
pub use switch::{Switch, SwitchError, SwitchSnapshot};
