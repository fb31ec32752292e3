#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use pointvlad_nn as nn;

#[doc(inline)]
pub use pointvlad_model as model;

#[doc(inline)]
pub use pointvlad_eval as eval;
