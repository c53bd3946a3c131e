mod seed;

pub use seed::{SeedArgs, cmd_seed};
