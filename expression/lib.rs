#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod data;
pub mod fold_change;
pub mod multitest;
pub mod normality;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod ttest;
pub mod types;
