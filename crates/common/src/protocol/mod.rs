// Wire protocol definitions shared between the gateway and its clients.

pub mod ws;
