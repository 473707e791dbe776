pub mod nnls;
