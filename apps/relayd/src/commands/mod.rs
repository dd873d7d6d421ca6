pub mod config;
pub mod keys;
pub mod run;

pub use config::cmd_init_config;
pub use keys::{
    cmd_keys_init, cmd_keys_list, cmd_keys_purge, cmd_keys_rotate, cmd_keys_show, cmd_teams,
};
pub use run::cmd_run;
