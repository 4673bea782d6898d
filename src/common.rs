pub use anyhow::{bail, ensure, Result};
pub use itertools::Itertools;
pub use log::{debug, info};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use tch::{
    nn::{self, Conv2D, ConvConfig, Linear, Module},
    Device, Kind, Tensor,
};
