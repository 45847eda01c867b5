/// Identifier of an agent under oversight. Opaque to the engine.
pub type AgentId = String;

/// Identifier of a stored policy.
pub type PolicyId = String;

/// Name of a tool or action an agent asks to perform.
pub type ActionName = String;

/// Name of a reported metric (e.g. `spend_usd`).
pub type MetricName = String;
