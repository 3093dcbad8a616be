pub mod checkpoint;
pub mod evaluation;
pub mod training_run;
