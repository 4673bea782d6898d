pub mod common;
pub mod config;
pub mod dist;
pub mod model;

pub use config::{Mode, SavpHParams};
pub use model::{
    Generator, GeneratorGivenZ, GeneratorGivenZInit, GeneratorInit, SavpCell, SavpCellInit,
    SavpCellInput, SavpCellOutput, SavpCellState, SequenceOutputs,
};
