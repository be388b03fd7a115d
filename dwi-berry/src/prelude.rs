//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Idx4d};

pub use crate::config::{protocol_dir_from_env_or_home, NormalizeConfig};
pub use crate::data::{DwiVolume, NiftiHeaderAttr, OutputGeometry};
pub use crate::echo::{EchoGroups, EchoTimes, TeGroup, TeGrouping};
pub use crate::error::{NormError, NormResult};
pub use crate::norm::{GroupSummary, NormReport, Normalizer};
pub use crate::pipeline::{run, stage_output_path};
pub use crate::protocol::{Protocol, ProtocolPaths, UnitScales};
