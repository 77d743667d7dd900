// Domain layer - controller state and chart series
pub mod controller;
pub mod series;
