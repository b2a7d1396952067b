mod handler;
pub mod model;

pub use handler::{
    add_to_shopping_cart, create_recipe, delete_recipe, download_shopping_cart, favorite,
    get_recipe, list_recipes, remove_from_shopping_cart, unfavorite, update_recipe,
};
