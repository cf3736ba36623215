pub mod machine;
pub mod register_allocator;
pub mod targets;

#[cfg(test)]
pub(crate) mod test_utils;
