mod handler;
pub mod model;

pub use handler::{
    delete_avatar, get_avatar, get_user, list_users, login, me, register, set_password, subscribe,
    subscriptions, unsubscribe, update_avatar,
};
