// Reel Recall engine — corpus access, matching, and the retrieval cascade.

pub mod corpus;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod lexical;
pub mod policy;
