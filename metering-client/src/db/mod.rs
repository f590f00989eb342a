pub mod measurement_queries;
