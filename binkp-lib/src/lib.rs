/*!
# FidoNet value types

the small set of types shared between the BinkP session engine and the
daemon: the node [`FtnAddress`], the [`ItemInfo`] describing a file (or
mail packet) exchanged during a session and the file name escaping rules
of the BinkP protocol (see [`escape`] and [`unescape`]).
*/

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod address;
mod escape;
mod item;

pub use self::{
    address::{AddressError, FtnAddress},
    escape::{escape, unescape},
    item::{ItemInfo, ItemInfoError},
};
