pub mod combinators;
