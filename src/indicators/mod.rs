// =============================================================================
// Indicator Kernel — pure technical-indicator functions
// =============================================================================
//
// Every function here is deterministic and allocation-only: no I/O, no
// logging, no shared state. The engine calls these once per scanned symbol
// per cycle and keeps only the last value of each series.
// =============================================================================

pub mod rsi;
pub mod sma;

pub use rsi::rsi;
pub use sma::sma;
