pub mod bitso;
pub mod bybit;
