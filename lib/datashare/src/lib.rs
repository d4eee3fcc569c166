#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]

mod config;
pub mod error;
mod node;

pub use config::DataShareConfig;
pub use node::DataShare;

pub mod model {
    pub use datashare_model::*;
}

pub mod common {
    pub use datashare_common::*;
}

pub mod storage {
    pub use datashare_storage::*;
}

pub mod engine {
    pub use datashare_engine::*;
}

pub mod federation {
    pub use datashare_federation::*;
}
