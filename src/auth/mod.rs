pub mod jwt;

pub use jwt::AuthUser;
