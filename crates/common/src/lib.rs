// switchboard-common: wire types shared by the gateway and its clients

pub mod protocol;
