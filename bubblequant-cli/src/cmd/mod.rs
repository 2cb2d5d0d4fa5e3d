pub mod compact;
pub mod inspect;
pub mod lengths;
pub mod quant;
