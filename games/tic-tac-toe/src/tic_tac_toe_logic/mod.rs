//! The module for the tic-tac-toe logic. This contains the implementations the host core needs,
//! see [`host_core::traits`].

pub mod backend;
pub mod traits_implementation;
