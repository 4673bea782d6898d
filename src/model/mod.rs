mod cell;
mod generator;
pub mod kernels;
pub mod layers;
mod rnn;
mod unroll;

pub use cell::{SavpCell, SavpCellInit, SavpCellInput, SavpCellOutput, SavpCellState};
pub use generator::{FrameEncoder, Generator, GeneratorInit, LatentDist};
pub use rnn::{ConvLstm, LatentLstm, LstmState};
pub use unroll::{GeneratorGivenZ, GeneratorGivenZInit, SequenceOutputs};
