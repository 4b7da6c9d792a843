pub mod activity;
pub mod fanout;
pub mod handlers;
pub mod receipts;
pub mod scope;
pub mod views;
