// Backends implement the queue operations as inherent methods; these forward
// the trait methods to them.

macro_rules! impl_queue_consumer {
    ($ident:ident) => {
        #[deny(unconditional_recursion)]
        impl crate::QueueConsumer for $ident {
            fn receive(
                &mut self,
            ) -> impl std::future::Future<Output = crate::Result<crate::Delivery>> + Send {
                $ident::receive(self)
            }

            fn receive_all(
                &mut self,
                max_messages: usize,
                deadline: std::time::Duration,
            ) -> impl std::future::Future<Output = crate::Result<Vec<crate::Delivery>>> + Send {
                $ident::receive_all(self, max_messages, deadline)
            }
        }
    };
}

macro_rules! impl_queue_producer {
    ($ident:ident) => {
        #[deny(unconditional_recursion)]
        impl crate::QueueProducer for $ident {
            fn send_bytes(
                &self,
                body: &[u8],
            ) -> impl std::future::Future<Output = crate::Result<()>> + Send {
                $ident::send_bytes(self, body)
            }

            fn send_serde_json<T: serde::Serialize + Sync>(
                &self,
                value: &T,
            ) -> impl std::future::Future<Output = crate::Result<()>> + Send {
                $ident::send_serde_json(self, value)
            }
        }
    };
}
