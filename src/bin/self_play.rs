use std::sync::Arc;

use cattus_selfplay::error::PipelineError;
use cattus_selfplay::net::linear::LinearNetBuilder;
use cattus_selfplay::self_play_cmd::run_main;
use cattus_selfplay::ttt::TttGame;

fn main() -> Result<(), PipelineError> {
    run_main::<TttGame>(Arc::new(LinearNetBuilder::<TttGame>::new()))
}
