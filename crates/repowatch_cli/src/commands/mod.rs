pub(crate) mod meta;
pub(crate) mod migrate;
pub(crate) mod shared;
pub(crate) mod status;

#[cfg(feature = "github")]
pub(crate) mod run;

#[cfg(feature = "github")]
pub(crate) mod walk;

#[cfg(feature = "kafka")]
pub(crate) mod consume;
