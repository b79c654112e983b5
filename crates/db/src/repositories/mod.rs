pub mod command_repo;

pub use command_repo::CommandRepo;
