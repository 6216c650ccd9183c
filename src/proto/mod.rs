//! Wire messages
//!
//! Hand-declared `prost` messages for the parts of the remote-execution,
//! long-running operations, bytestream and backplane APIs this client reads.
//! Only consumed fields are declared; unknown fields are skipped on decode.

/// Implement [`prost::Name`] for messages in one protobuf package.
macro_rules! message_name {
    ($package:literal => $($ty:ident),+ $(,)?) => {
        $(
            impl ::prost::Name for $ty {
                const NAME: &'static str = stringify!($ty);
                const PACKAGE: &'static str = $package;
            }
        )+
    };
}

pub mod buildfarm;
pub mod bytestream;
pub mod longrunning;
pub mod remote_execution;
pub mod rpc;

use prost::{Message, Name};
use prost_types::Any;

/// Prefix of `google.protobuf.Any` type URLs.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Whether `any` carries a message of type `M`.
pub fn any_is<M: Name>(any: &Any) -> bool {
    any.type_url.rsplit('/').next() == Some(M::full_name().as_str())
}

/// Decode `any` as `M`, returning `None` if the type URL names another message.
pub fn unpack<M>(any: &Any) -> Option<Result<M, prost::DecodeError>>
where
    M: Message + Name + Default,
{
    any_is::<M>(any).then(|| M::decode(any.value.as_slice()))
}

/// Wrap `message` in an `Any` with the canonical type URL.
pub fn pack<M: Message + Name>(message: &M) -> Any {
    Any {
        type_url: format!("{}{}", TYPE_URL_PREFIX, M::full_name()),
        value: message.encode_to_vec(),
    }
}
