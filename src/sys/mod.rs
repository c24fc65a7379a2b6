// 🛡️ Zero-Trust Architecture: contracts live in `traits`, one implementation per module.

pub mod traits;         // Global contracts
pub mod secrets;        // Memory hygiene (SecretToken, Credentials)
pub mod request;        // Signing request & origin value objects
pub mod command;        // Injection-free command model
pub mod exec;           // Interpreter execution under a timeout
pub mod extract;        // Request id from script output
pub mod process_signer; // Facade over the interpreter
pub mod http_signer;    // Facade over the REST API
pub mod git;            // Origin metadata from source control
pub mod store;          // Workspace artifacts & environment secrets
