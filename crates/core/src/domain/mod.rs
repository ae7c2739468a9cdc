pub mod approval;
pub mod requester;
pub mod template;
