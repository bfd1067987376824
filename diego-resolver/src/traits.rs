use serde::{de::DeserializeOwned, Deserialize, Serialize};

// Identity of a client submission, used for at-most-once de-duplication.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RequestToken {
    pub client_id: i64,
    pub req_id: i64,
}

impl RequestToken {
    pub fn new(client_id: i64, req_id: i64) -> Self {
        Self { client_id, req_id }
    }
}

// Intended for client and test code, not used by the resolver itself. Not
// thread-safe.
pub struct RequestTokenGenerator {
    client_id: i64,
    next_req_id: i64,
}

impl RequestTokenGenerator {
    pub fn new(client_id: i64) -> Self {
        Self {
            client_id,
            next_req_id: 0,
        }
    }

    pub fn next(&mut self) -> RequestToken {
        self.next_req_id += 1;
        RequestToken::new(self.client_id, self.next_req_id)
    }
}

pub trait Transaction: Clone + Send + 'static {
    // Id of the state this transaction was authored against; rewritten to
    // the committed id on success.
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn token(&self) -> RequestToken;
}

pub trait DurableTransaction: Transaction + Serialize + DeserializeOwned {}
impl<T: Transaction + Serialize + DeserializeOwned> DurableTransaction for T {}

pub trait State: Send + 'static {
    type Txn: Transaction;

    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);

    // Called only when this state's id equals t.id(), or from the
    // stale-reject path where the implementation may choose whether to call
    // this at all. Must mutate state in place on accept and return the
    // committed transaction (possibly rewritten).
    fn apply(&mut self, t: Self::Txn) -> (bool, Option<Self::Txn>);

    // Rewrite t so it can be applied atop the current head, given the
    // bounded log of transactions since ancestor. May reject.
    fn resolve(
        &self,
        ancestor: &Self,
        log: &crate::log::Log<Self::Txn>,
        current: Self::Txn,
    ) -> (bool, Option<Self::Txn>);
}
