pub mod extendible_hash_test;
