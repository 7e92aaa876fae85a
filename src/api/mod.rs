pub(crate) mod admin;
pub(crate) mod errors;
pub(crate) mod exam;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod router;
