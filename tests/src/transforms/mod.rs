mod cli;
mod pipeline;
mod renaming;
mod shuffle;
