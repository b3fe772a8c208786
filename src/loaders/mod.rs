pub mod vector_store;

pub use vector_store::{VectorStoreConfig, VectorStoreLoader};
