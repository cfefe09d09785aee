//! XML utilities shared by every compile pass.

mod utils;

pub use utils::{
    attr_bool, attr_char, attr_i64, attr_u64, describe, element_children, find_child,
    find_children, get_tag_name, parse_bool, position, required_attr,
};
