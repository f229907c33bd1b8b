//! The dnode wire protocol: message shape, codec, and deferred-decode
//! `Partial` (spec §4.1).

pub mod codec;
pub mod message;
pub mod partial;

pub use codec::{decode, encode, serialize, ArgNode, CallbackFn, PendingCallback};
pub use message::{CallbackTable, Links, Message, MethodId, PathComponent, FUNCTION_PLACEHOLDER};
pub use partial::{Callback, CallbackSender, CallbackSpec, Partial};
