// tests/property/main.rs

mod admission;
mod graph;
