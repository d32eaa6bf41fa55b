#[cfg(feature = "candle")]
pub mod gguf_model;
#[cfg(feature = "candle")]
pub mod hub;
#[cfg(feature = "candle")]
pub mod local;

#[cfg(feature = "candle")]
pub use local::CandleBackend;

use anyhow::Result;

use crate::config::RunConfig;
use crate::harness::Connector;
use crate::models::Backend;

/// Connects to whichever loading capability this binary was built with.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    #[cfg(feature = "candle")]
    fn connect(&self, config: &RunConfig) -> Result<Box<dyn Backend>> {
        Ok(Box::new(CandleBackend::new(config)?))
    }

    #[cfg(not(feature = "candle"))]
    fn connect(&self, _config: &RunConfig) -> Result<Box<dyn Backend>> {
        anyhow::bail!("no model backend compiled in; rebuild with the `candle` feature")
    }
}
