pub mod builder;
pub mod conversions;
pub mod types;

pub use builder::{build_connector, build_connector_with_transport, build_dispatcher, BitsoExchange};
pub use conversions::BitsoBinding;
