pub mod config;
pub mod error;
pub mod game;
pub mod inference;
pub mod net;
pub mod self_play;
pub mod self_play_cmd;
pub mod ttt;
pub mod util;

#[cfg(test)]
mod test_util;
