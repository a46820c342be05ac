pub mod args;
pub mod serializers;
