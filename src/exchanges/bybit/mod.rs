pub mod builder;
pub mod codec;
pub mod conversions;
pub mod types;

pub use builder::{
    build_connector, build_connector_with_transport, build_dispatcher, private_stream,
    public_stream, BybitExchange,
};
pub use codec::BybitCodec;
pub use conversions::BybitBinding;
