mod barrier;
mod cache;
mod strategies;
