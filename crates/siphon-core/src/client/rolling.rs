//! Client rotation strategies.

/// Decides which client a [`ClientPool`](super::ClientPool) session tries
/// next.
///
/// `reset` is called once at the start of each `with_client` session; `next`
/// is called for the first attempt and after every failed attempt. Returning
/// `None` means every client was offered once this session.
pub trait RollingStrategy<C: Clone>: Send {
    fn reset(&mut self);
    fn next(&mut self, clients: &[C]) -> Option<C>;
}

/// Sticky rotation: sessions resume at the most recently successful client.
///
/// The very first call across the strategy's lifetime returns client 0. After
/// a `reset`, the next call returns the client that satisfied the previous
/// session, then continues onward, wrapping modulo pool size, until every
/// client has been tried exactly once within the session.
#[derive(Debug)]
pub struct StickyRollingStrategy {
    first_call: bool,
    used_client_count: usize,
    next_client_index: usize,
}

impl StickyRollingStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self { first_call: true, used_client_count: 0, next_client_index: 0 }
    }

    fn prev_index(&self, len: usize) -> usize {
        if self.next_client_index == 0 {
            len - 1
        } else {
            self.next_client_index - 1
        }
    }
}

impl Default for StickyRollingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone> RollingStrategy<C> for StickyRollingStrategy {
    fn reset(&mut self) {
        self.used_client_count = 0;
    }

    fn next(&mut self, clients: &[C]) -> Option<C> {
        if clients.len() == self.used_client_count {
            return None;
        }

        if self.first_call {
            self.first_call = false;
            self.used_client_count += 1;
            self.next_client_index = 1;
            return Some(clients[0].clone());
        }

        if self.next_client_index == clients.len() {
            // roll over to the first client
            self.next_client_index = 0;
        }

        if self.used_client_count == 0 {
            // fresh session: step back to the client that ended the last one
            self.next_client_index = self.prev_index(clients.len());
        }

        let client = clients[self.next_client_index].clone();
        self.used_client_count += 1;
        self.next_client_index += 1;
        Some(client)
    }
}

/// Fixed-order rotation: always starts at client 0 and walks the pool in
/// index order.
#[derive(Debug, Default)]
pub struct AlwaysFirstStrategy {
    next_index: usize,
}

impl AlwaysFirstStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self { next_index: 0 }
    }
}

impl<C: Clone> RollingStrategy<C> for AlwaysFirstStrategy {
    fn reset(&mut self) {
        self.next_index = 0;
    }

    fn next(&mut self, clients: &[C]) -> Option<C> {
        let client = clients.get(self.next_index)?.clone();
        self.next_index += 1;
        Some(client)
    }
}
