pub mod camif;
